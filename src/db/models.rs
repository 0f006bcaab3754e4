use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Processing category: waveform-domain vs spectral-domain indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingType {
    Temporal,
    Spectral,
}

impl ProcessingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Spectral => "spectral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "temporal" => Some(Self::Temporal),
            "spectral" => Some(Self::Spectral),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog-level lifecycle status of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Normal,
    /// Duration outside tolerance; excluded from measurement writes but
    /// retained for navigation.
    Skipped,
    /// At least one chunk write was rejected as out of range.
    Partial,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Skipped => "skipped",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "skipped" => Some(Self::Skipped),
            "partial" => Some(Self::Partial),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data for inserting or updating a recording (ingest phase).
pub struct NewRecording {
    pub volume: String,
    pub relative_path: String,
    pub recorded_at: NaiveDateTime,
    pub nominal_duration_sec: f64,
    pub actual_duration_sec: Option<f64>,
    pub sample_rate_hz: i64,
    pub device_id: Option<String>,
}

/// A recording row read from the catalog.
#[derive(Debug, Clone)]
pub struct Recording {
    pub id: i64,
    pub volume: String,
    pub relative_path: String,
    pub recorded_at: NaiveDateTime,
    pub nominal_duration_sec: f64,
    pub actual_duration_sec: Option<f64>,
    pub sample_rate_hz: i64,
    pub device_id: Option<String>,
    pub processing_status: ProcessingStatus,
    pub site_id: Option<i64>,
    pub weather_id: Option<i64>,
}

impl Recording {
    /// Duration used for chunk-grid arithmetic: actual where known,
    /// nominal otherwise.
    pub fn duration_sec(&self) -> f64 {
        self.actual_duration_sec.unwrap_or(self.nominal_duration_sec)
    }
}

/// One chunk's value as produced by an external index processor.
#[derive(Debug, Clone, Copy)]
pub struct ChunkValue {
    pub chunk_index: i64,
    pub value: Option<f64>,
}

/// A raw measurement row (audit / reporting access).
#[derive(Debug, Clone)]
pub struct MeasurementRow {
    pub recording_id: i64,
    pub index_name: String,
    pub processing_type: ProcessingType,
    pub chunk_index: i64,
    pub start_time_sec: f64,
    pub value: Option<f64>,
}

/// One index's dense series for a recording: ordered by chunk_index with
/// explicit `None` holes, length equal to the registry's chunk_count.
#[derive(Debug, Clone)]
pub struct IndexSeries {
    pub index_name: String,
    pub processing_type: ProcessingType,
    pub chunk_duration_sec: f64,
    pub values: Vec<Option<f64>>,
}

/// A registered processing scale.
#[derive(Debug, Clone)]
pub struct ProcessingScale {
    pub config_name: String,
    pub processing_type: ProcessingType,
    pub chunk_duration_sec: f64,
}

/// A stored index configuration (reproducibility fingerprint).
#[derive(Debug, Clone)]
pub struct IndexConfigRow {
    pub config_name: String,
    pub index_name: String,
    pub processing_type: ProcessingType,
    pub processor_name: String,
    pub config_fragment: String,
    pub config_hash: String,
}

/// Catalog-wide value range for one index.
#[derive(Debug, Clone, Copy)]
pub struct IndexStats {
    pub min_value: f64,
    pub max_value: f64,
}

/// A new hourly weather observation for a site. Deserializable so bulk
/// imports can come straight from exported JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewObservation {
    pub observed_at: NaiveDateTime,
    pub temperature_2m: Option<f64>,
    pub relative_humidity_2m: Option<f64>,
    pub precipitation: Option<f64>,
    pub wind_speed_10m: Option<f64>,
    pub weather_code: Option<i64>,
    pub cloud_cover: Option<f64>,
    pub pressure_msl: Option<f64>,
}

/// Weather snapshot for one recording (read-only join).
#[derive(Debug, Clone)]
pub struct WeatherSnapshot {
    pub observed_at: NaiveDateTime,
    pub temperature_2m: Option<f64>,
    pub relative_humidity_2m: Option<f64>,
    pub precipitation: Option<f64>,
    pub wind_speed_10m: Option<f64>,
    pub weather_code: Option<i64>,
    pub cloud_cover: Option<f64>,
    pub pressure_msl: Option<f64>,
    pub site_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Store-wide statistics for reporting.
#[derive(Debug)]
pub struct StoreStats {
    pub total_recordings: i64,
    pub recordings_with_values: i64,
    pub total_values: i64,
    /// (processing_type, index_name, value count, recording count)
    pub by_index: Vec<(String, String, i64, i64)>,
    pub status_counts: Vec<(String, i64)>,
}
