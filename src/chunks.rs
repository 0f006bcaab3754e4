//! Chunk-grid arithmetic shared by every reader and writer.
//!
//! All chunk/time/pixel conversions go through `ChunkGrid` so that indices
//! computed at different native resolutions stay exactly aligned. Nobody
//! re-derives chunk boundaries from stored data.

/// The chunk grid for one recording at one chunk duration.
///
/// For duration D and chunk duration C: `chunk_count = ceil(D / C)`, and
/// chunk k spans `[k*C, min((k+1)*C, D))`. The final chunk may be shorter
/// than C; it is retained, and its span reflects the real end of the
/// recording rather than a uniform width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkGrid {
    pub duration_sec: f64,
    pub chunk_duration_sec: f64,
}

impl ChunkGrid {
    /// `chunk_duration_sec` must be positive; the registry enforces this
    /// before a scale is ever stored.
    pub fn new(duration_sec: f64, chunk_duration_sec: f64) -> Self {
        debug_assert!(chunk_duration_sec > 0.0);
        Self {
            duration_sec,
            chunk_duration_sec,
        }
    }

    /// Number of chunks covering the full duration, including a short
    /// remainder chunk.
    pub fn chunk_count(&self) -> usize {
        if self.duration_sec <= 0.0 {
            return 0;
        }
        (self.duration_sec / self.chunk_duration_sec).ceil() as usize
    }

    /// Start time of chunk k. Valid for all k before `chunk_count`.
    pub fn start_time(&self, chunk_index: usize) -> f64 {
        chunk_index as f64 * self.chunk_duration_sec
    }

    /// Half-open time span `[start, end)` of chunk k, clamped to the
    /// recording end for the final chunk.
    pub fn span(&self, chunk_index: usize) -> (f64, f64) {
        let start = self.start_time(chunk_index);
        let end = (start + self.chunk_duration_sec).min(self.duration_sec);
        (start, end)
    }

    /// Chunk containing time t, clamped into the valid range.
    pub fn chunk_at(&self, time_sec: f64) -> usize {
        let count = self.chunk_count();
        if count == 0 {
            return 0;
        }
        let k = (time_sec / self.chunk_duration_sec).floor();
        (k.max(0.0) as usize).min(count - 1)
    }

    /// Whether chunk_index falls inside the valid range for this grid.
    pub fn contains(&self, chunk_index: i64) -> bool {
        chunk_index >= 0 && (chunk_index as usize) < self.chunk_count()
    }

    /// Project chunk k onto a horizontal axis of `width` pixels:
    /// `pixel(k) = floor(k * width / chunk_count)`.
    ///
    /// This is how series at different native resolutions render onto one
    /// shared axis without re-binning the underlying audio.
    pub fn pixel(&self, chunk_index: usize, width: usize) -> usize {
        let count = self.chunk_count();
        if count == 0 {
            return 0;
        }
        chunk_index * width / count
    }
}
