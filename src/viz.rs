//! RGB false-color encoding of acoustic index series.
//!
//! Long-duration soundscape visualizations map three indices onto the
//! red, green and blue channels of a one-pixel-per-chunk strip. Channels
//! may come from different chunk resolutions; the strip runs at the
//! finest assigned resolution with coarser channels held stepwise.

use serde::{Deserialize, Serialize};

use crate::chunks::ChunkGrid;
use crate::db::models::{IndexSeries, IndexStats};
use crate::db::{Database, StoreError};

/// Which index feeds each channel. Unassigned channels render black.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelAssignment {
    pub red: Option<String>,
    pub green: Option<String>,
    pub blue: Option<String>,
}

impl ChannelAssignment {
    fn slots(&self) -> [Option<&str>; 3] {
        [
            self.red.as_deref(),
            self.green.as_deref(),
            self.blue.as_deref(),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.slots().iter().all(Option::is_none)
    }
}

/// Where a channel's normalization range came from. Catalog-wide stats
/// make strips comparable across recordings; the per-recording fallback
/// only maximizes local contrast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeSource {
    Catalog,
    Recording,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NormalizationRange {
    pub min: f64,
    pub max: f64,
    pub source: RangeSource,
}

impl NormalizationRange {
    /// Map a value onto 0..=255. A degenerate range (min == max) maps
    /// everything to 0 rather than dividing by zero.
    fn scale(&self, value: f64) -> u8 {
        if self.max <= self.min {
            return 0;
        }
        let norm = (value - self.min) / (self.max - self.min);
        (norm * 255.0).round().clamp(0.0, 255.0) as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RgbChunk {
    pub chunk_index: usize,
    pub start_time_sec: f64,
    pub rgb: [u8; 3],
    /// Pre-normalization values, kept for tooltips and export.
    pub raw: [Option<f64>; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RgbEncoding {
    pub chunks: Vec<RgbChunk>,
    pub ranges: [Option<NormalizationRange>; 3],
    /// Cadence of the strip: the finest assigned chunk duration.
    pub chunk_duration_sec: f64,
}

impl RgbEncoding {
    /// Strip pixel column for a chunk at a given output width. Same
    /// projection as [`crate::chunks::ChunkGrid::pixel`], over the strip's
    /// own grid.
    pub fn pixel(&self, chunk_index: usize, width: usize) -> usize {
        if self.chunks.is_empty() {
            return 0;
        }
        chunk_index * width / self.chunks.len()
    }
}

/// Encode one recording's assigned indices as an RGB strip.
///
/// The strip runs at the finest chunk duration among the assigned
/// channels. A coarser channel repeats its chunk value for every fine
/// chunk it covers (step-hold, no interpolation). Each channel is
/// normalized by the catalog-wide range when `index_stats` has one,
/// falling back to the recording's own extent.
pub fn encode_rgb(
    db: &Database,
    recording_id: i64,
    assignment: &ChannelAssignment,
) -> Result<RgbEncoding, StoreError> {
    if assignment.is_empty() {
        return Err(StoreError::NotFound {
            what: "assigned rgb channel",
            key: recording_id.to_string(),
        });
    }

    let recording = match db.recording(recording_id) {
        Ok(rec) => Some(rec),
        Err(StoreError::NotFound { .. }) => None,
        Err(e) => return Err(e),
    };

    let slots = assignment.slots();
    let names: Vec<&str> = slots.iter().flatten().copied().collect();
    let series = match recording {
        Some(_) => db.query_measurements(recording_id, Some(&names), None)?,
        None => Vec::new(),
    };

    let channel_series: [Option<&IndexSeries>; 3] = slots.map(|slot| {
        slot.and_then(|name| series.iter().find(|s| s.index_name == name))
    });

    // Finest assigned resolution drives the strip. The cadence of each
    // channel comes from its registered scale, so an assigned channel with
    // no stored values yet still pins the grid; stored rows only stand in
    // for indices that predate scale registration.
    let mut durations: [Option<f64>; 3] = [None; 3];
    for (c, slot) in slots.iter().enumerate() {
        let Some(name) = *slot else { continue };
        durations[c] = match registered_duration(db, name)? {
            Some(d) => Some(d),
            None => channel_series[c].map(|s| s.chunk_duration_sec),
        };
    }
    let cadence = durations
        .iter()
        .flatten()
        .copied()
        .fold(f64::INFINITY, f64::min);
    if !cadence.is_finite() {
        return Ok(RgbEncoding {
            chunks: Vec::new(),
            ranges: [None, None, None],
            chunk_duration_sec: 0.0,
        });
    }
    let duration_sec = recording.as_ref().map(|r| r.duration_sec()).unwrap_or(0.0);
    let mut count = ChunkGrid::new(duration_sec, cadence).chunk_count();
    for s in channel_series.iter().flatten() {
        if s.chunk_duration_sec == cadence {
            count = count.max(s.values.len());
        }
    }
    if count == 0 {
        return Ok(RgbEncoding {
            chunks: Vec::new(),
            ranges: [None, None, None],
            chunk_duration_sec: 0.0,
        });
    }

    let mut ranges: [Option<NormalizationRange>; 3] = [None, None, None];
    for (c, s) in channel_series.iter().enumerate() {
        if let Some(s) = s {
            ranges[c] = normalization_range(db, s)?;
        }
    }

    let mut chunks = Vec::with_capacity(count);
    for k in 0..count {
        let start = k as f64 * cadence;
        let mut rgb = [0u8; 3];
        let mut raw = [None; 3];
        for c in 0..3 {
            let (Some(s), Some(range)) = (channel_series[c], ranges[c]) else {
                continue;
            };
            // Step-hold: the coarser chunk covering this start time
            let idx = ((start / s.chunk_duration_sec).floor() as usize)
                .min(s.values.len().saturating_sub(1));
            if let Some(v) = s.values[idx] {
                raw[c] = Some(v);
                rgb[c] = range.scale(v);
            }
        }
        chunks.push(RgbChunk { chunk_index: k, start_time_sec: start, rgb, raw });
    }

    Ok(RgbEncoding { chunks, ranges, chunk_duration_sec: cadence })
}

/// Chunk duration of an index's registered scale, resolved through its
/// most recent configuration. `None` when the index was never registered.
fn registered_duration(db: &Database, index_name: &str) -> Result<Option<f64>, StoreError> {
    match db.configuration_for(index_name, None)? {
        Some(cfg) => db.scale(&cfg.config_name, cfg.processing_type),
        None => Ok(None),
    }
}

/// Catalog range when cached, recording extent otherwise. `None` when the
/// series has no values at all.
fn normalization_range(
    db: &Database,
    series: &IndexSeries,
) -> Result<Option<NormalizationRange>, StoreError> {
    if let Some(IndexStats { min_value, max_value }) = db.index_stats(&series.index_name)? {
        return Ok(Some(NormalizationRange {
            min: min_value,
            max: max_value,
            source: RangeSource::Catalog,
        }));
    }

    let mut extent: Option<(f64, f64)> = None;
    for v in series.values.iter().flatten() {
        extent = Some(match extent {
            None => (*v, *v),
            Some((lo, hi)) => (lo.min(*v), hi.max(*v)),
        });
    }
    Ok(extent.map(|(min, max)| NormalizationRange {
        min,
        max,
        source: RangeSource::Recording,
    }))
}
