use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::db::models::ProcessingType;
use crate::solar::PeriodThresholds;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing '{0}' in analysis config")]
    Missing(&'static str),
    #[error("chunk_duration_sec for {0} must be positive")]
    InvalidChunkDuration(ProcessingType),
}

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults — the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Admission tolerance on |actual − nominal| duration, in seconds.
    pub duration_tolerance_sec: f64,
    /// Solar period classification windows.
    pub periods: PeriodConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            workers: 0,
            duration_tolerance_sec: 2.0,
            periods: PeriodConfig::default(),
        }
    }
}

/// Thresholds for the coarse Dawn/Day/Dusk/Evening/Night tag.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PeriodConfig {
    pub dawn_window_min: i64,
    pub dusk_window_min: i64,
    pub evening_end_min: i64,
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            dawn_window_min: 120,
            dusk_window_min: 120,
            evening_end_min: 300,
        }
    }
}

impl PeriodConfig {
    pub fn thresholds(&self) -> PeriodThresholds {
        PeriodThresholds {
            dawn_window_min: self.dawn_window_min,
            dusk_window_min: self.dusk_window_min,
            evening_end_min: self.evening_end_min,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/dawnchorus/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("dawnchorus.db")
    } else {
        PathBuf::from("dawnchorus.db")
    }
}

/// One named index inside an analysis configuration.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub processor: String,
    pub params: serde_json::Value,
}

/// One processing type's section: chunk duration plus named indices.
#[derive(Debug, Clone)]
pub struct ScaleSection {
    pub chunk_duration_sec: f64,
    pub indices: BTreeMap<String, IndexSpec>,
}

/// The declarative analysis configuration — authoritative input to the
/// scale registry, never inferred from stored data.
///
/// YAML shape:
/// ```yaml
/// acoustic_indices:
///   temporal:
///     chunk_duration_sec: 4.5
///     temporal_entropy:
///       processor: TemporalEntropyProcessor
///       params: { bins: 256 }
///   spectral:
///     chunk_duration_sec: 9.0
///     aci:
///       processor: ACIProcessor
/// ```
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub name: String,
    pub temporal: Option<ScaleSection>,
    pub spectral: Option<ScaleSection>,
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "config.yaml".to_string());
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&name, &contents)
    }

    pub fn from_yaml_str(name: &str, yaml: &str) -> Result<Self, ConfigError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let indices = doc
            .get("acoustic_indices")
            .ok_or(ConfigError::Missing("acoustic_indices"))?;

        let temporal = parse_section(indices.get("temporal"), ProcessingType::Temporal)?;
        let spectral = parse_section(indices.get("spectral"), ProcessingType::Spectral)?;

        Ok(Self {
            name: name.to_string(),
            temporal,
            spectral,
        })
    }

    /// Present sections in registry order.
    pub fn sections(&self) -> Vec<(ProcessingType, &ScaleSection)> {
        let mut out = Vec::new();
        if let Some(ref s) = self.temporal {
            out.push((ProcessingType::Temporal, s));
        }
        if let Some(ref s) = self.spectral {
            out.push((ProcessingType::Spectral, s));
        }
        out
    }
}

fn parse_section(
    section: Option<&serde_yaml::Value>,
    ptype: ProcessingType,
) -> Result<Option<ScaleSection>, ConfigError> {
    let Some(sec) = section else {
        return Ok(None);
    };
    let Some(map) = sec.as_mapping() else {
        return Ok(None);
    };

    let chunk_duration_sec = sec
        .get("chunk_duration_sec")
        .and_then(|v| v.as_f64())
        .ok_or(ConfigError::Missing("chunk_duration_sec"))?;
    if chunk_duration_sec <= 0.0 {
        return Err(ConfigError::InvalidChunkDuration(ptype));
    }

    let mut indices = BTreeMap::new();
    for (key, value) in map {
        let Some(index_name) = key.as_str() else { continue };
        if index_name == "chunk_duration_sec" {
            continue;
        }
        // Only mappings carrying a processor are index entries
        let Some(processor) = value.get("processor").and_then(|p| p.as_str()) else {
            continue;
        };
        let params = match value.get("params") {
            Some(p) => serde_json::to_value(p)?,
            None => serde_json::Value::Object(serde_json::Map::new()),
        };
        indices.insert(
            index_name.to_string(),
            IndexSpec {
                processor: processor.to_string(),
                params,
            },
        );
    }

    Ok(Some(ScaleSection {
        chunk_duration_sec,
        indices,
    }))
}

/// Canonical JSON fragment and its reproducibility fingerprint for one
/// index configuration: sha256 over sorted-key JSON, first 16 hex chars.
pub fn config_fragment(spec: &IndexSpec, ptype: ProcessingType) -> (String, String) {
    let fragment = serde_json::json!({
        "processor": spec.processor,
        "params": spec.params,
        "processing_type": ptype.as_str(),
    });
    let canonical = canonical_json(&fragment);
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    (canonical, hex[..16].to_string())
}

/// Serialize with object keys sorted recursively, so the hash does not
/// depend on map iteration order.
fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
