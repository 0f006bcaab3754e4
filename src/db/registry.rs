use rusqlite::{OptionalExtension, params};

use super::models::{IndexConfigRow, IndexStats, ProcessingScale, ProcessingType};
use super::{Database, StoreError};
use crate::config::{AnalysisConfig, config_fragment};

impl Database {
    /// Declare the chunk duration for one (config, processing type) pair.
    /// All subsequent writes and reads resolve duration through here;
    /// nothing is ever inferred from stored measurement data.
    pub fn register_scale(
        &self,
        config_name: &str,
        ptype: ProcessingType,
        chunk_duration_sec: f64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO processing_scales (config_name, processing_type, chunk_duration_sec)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(config_name, processing_type) DO UPDATE SET
                 chunk_duration_sec = excluded.chunk_duration_sec",
            params![config_name, ptype.as_str(), chunk_duration_sec],
        )?;
        Ok(())
    }

    pub fn scale(
        &self,
        config_name: &str,
        ptype: ProcessingType,
    ) -> Result<Option<f64>, StoreError> {
        let v = self
            .conn
            .query_row(
                "SELECT chunk_duration_sec FROM processing_scales
                 WHERE config_name = ?1 AND processing_type = ?2",
                params![config_name, ptype.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(v)
    }

    pub fn require_scale(
        &self,
        config_name: &str,
        ptype: ProcessingType,
    ) -> Result<f64, StoreError> {
        self.scale(config_name, ptype)?.ok_or(StoreError::NotFound {
            what: "processing scale",
            key: format!("{config_name}/{ptype}"),
        })
    }

    pub fn list_scales(&self) -> Result<Vec<ProcessingScale>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT config_name, processing_type, chunk_duration_sec
             FROM processing_scales ORDER BY config_name, processing_type",
        )?;
        let scales = stmt
            .query_map([], |row| {
                let ptype: String = row.get(1)?;
                Ok((row.get::<_, String>(0)?, ptype, row.get::<_, f64>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|(config_name, ptype, chunk)| {
                ProcessingType::parse(&ptype).map(|p| ProcessingScale {
                    config_name,
                    processing_type: p,
                    chunk_duration_sec: chunk,
                })
            })
            .collect();
        Ok(scales)
    }

    /// Store one index configuration row. Duplicate (config, index, hash)
    /// tuples are ignored, so re-registering an unchanged config is a
    /// no-op while a changed parameterization gets a new versioned row.
    pub fn store_index_configuration(&self, row: &IndexConfigRow) -> Result<bool, StoreError> {
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO index_configurations
             (config_name, index_name, processing_type, processor_name, config_fragment, config_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.config_name,
                row.index_name,
                row.processing_type.as_str(),
                row.processor_name,
                row.config_fragment,
                row.config_hash,
            ],
        )?;
        Ok(n > 0)
    }

    /// Latest stored configuration for an index, optionally pinned to one
    /// config file.
    pub fn configuration_for(
        &self,
        index_name: &str,
        config_name: Option<&str>,
    ) -> Result<Option<IndexConfigRow>, StoreError> {
        let mut sql = String::from(
            "SELECT config_name, index_name, processing_type, processor_name,
                    config_fragment, config_hash
             FROM index_configurations WHERE index_name = ?1",
        );
        let mut args: Vec<String> = vec![index_name.to_string()];
        if let Some(c) = config_name {
            sql.push_str(" AND config_name = ?2");
            args.push(c.to_string());
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT 1");

        let row = self
            .conn
            .query_row(&sql, rusqlite::params_from_iter(args.iter()), config_row)
            .optional()?;
        Ok(row)
    }

    pub fn list_configurations(
        &self,
        config_name: Option<&str>,
    ) -> Result<Vec<IndexConfigRow>, StoreError> {
        let mut sql = String::from(
            "SELECT config_name, index_name, processing_type, processor_name,
                    config_fragment, config_hash
             FROM index_configurations",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(c) = config_name {
            sql.push_str(" WHERE config_name = ?1");
            args.push(c.to_string());
        }
        sql.push_str(" ORDER BY config_name, index_name, id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), config_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Register everything a declarative analysis config describes:
    /// one scale per processing type, one fingerprinted configuration row
    /// per named index. Returns (scales, new configuration rows).
    pub fn populate_from_config(&self, cfg: &AnalysisConfig) -> Result<(usize, usize), StoreError> {
        let mut scales = 0;
        let mut stored = 0;
        for (ptype, section) in cfg.sections() {
            self.register_scale(&cfg.name, ptype, section.chunk_duration_sec)?;
            scales += 1;

            for (index_name, spec) in &section.indices {
                let (fragment, hash) = config_fragment(spec, ptype);
                let new = self.store_index_configuration(&IndexConfigRow {
                    config_name: cfg.name.clone(),
                    index_name: index_name.clone(),
                    processing_type: ptype,
                    processor_name: spec.processor.clone(),
                    config_fragment: fragment,
                    config_hash: hash,
                })?;
                if new {
                    stored += 1;
                }
            }
        }
        log::info!(
            "registered {} scales and {} new index configurations from {}",
            scales,
            stored,
            cfg.name
        );
        Ok((scales, stored))
    }

    /// Catalog-wide value range for one index, if the derived cache holds
    /// one.
    pub fn index_stats(&self, index_name: &str) -> Result<Option<IndexStats>, StoreError> {
        let stats = self
            .conn
            .query_row(
                "SELECT min_value, max_value FROM index_stats WHERE index_name = ?1",
                params![index_name],
                |row| {
                    Ok(IndexStats {
                        min_value: row.get(0)?,
                        max_value: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }

    pub fn upsert_index_stats(
        &self,
        index_name: &str,
        stats: IndexStats,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO index_stats (index_name, min_value, max_value, computed_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(index_name) DO UPDATE SET
                 min_value = excluded.min_value,
                 max_value = excluded.max_value,
                 computed_at = datetime('now')",
            params![index_name, stats.min_value, stats.max_value],
        )?;
        Ok(())
    }

    /// Recompute the cached catalog-wide range from the canonical
    /// measurement rows. Returns the fresh stats, or None (cache row
    /// removed) when the index has no non-null values.
    pub fn refresh_index_stats(&self, index_name: &str) -> Result<Option<IndexStats>, StoreError> {
        let range: (Option<f64>, Option<f64>) = self.conn.query_row(
            "SELECT MIN(value), MAX(value) FROM measurements
             WHERE index_name = ?1 AND value IS NOT NULL",
            params![index_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        match range {
            (Some(min_value), Some(max_value)) => {
                let stats = IndexStats { min_value, max_value };
                self.upsert_index_stats(index_name, stats)?;
                Ok(Some(stats))
            }
            _ => {
                self.conn.execute(
                    "DELETE FROM index_stats WHERE index_name = ?1",
                    params![index_name],
                )?;
                Ok(None)
            }
        }
    }
}

fn config_row(row: &rusqlite::Row) -> rusqlite::Result<IndexConfigRow> {
    let ptype: String = row.get(2)?;
    Ok(IndexConfigRow {
        config_name: row.get(0)?,
        index_name: row.get(1)?,
        processing_type: ProcessingType::parse(&ptype).unwrap_or(ProcessingType::Temporal),
        processor_name: row.get(3)?,
        config_fragment: row.get(4)?,
        config_hash: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> AnalysisConfig {
        let yaml = "
acoustic_indices:
  temporal:
    chunk_duration_sec: 4.5
    temporal_entropy:
      processor: TemporalEntropyProcessor
      params:
        bins: 256
  spectral:
    chunk_duration_sec: 9.0
    aci:
      processor: ACIProcessor
      params:
        min_freq_hz: 500
";
        AnalysisConfig::from_yaml_str("config_site_a.yaml", yaml).unwrap()
    }

    #[test]
    fn test_register_and_resolve_scale() {
        let db = Database::open_in_memory().unwrap();
        db.register_scale("c.yaml", ProcessingType::Temporal, 4.5).unwrap();

        assert_eq!(db.scale("c.yaml", ProcessingType::Temporal).unwrap(), Some(4.5));
        assert_eq!(db.scale("c.yaml", ProcessingType::Spectral).unwrap(), None);

        // Re-registering updates in place
        db.register_scale("c.yaml", ProcessingType::Temporal, 2.25).unwrap();
        assert_eq!(db.require_scale("c.yaml", ProcessingType::Temporal).unwrap(), 2.25);
        assert_eq!(db.list_scales().unwrap().len(), 1);
    }

    #[test]
    fn test_require_scale_not_found() {
        let db = Database::open_in_memory().unwrap();
        match db.require_scale("nope.yaml", ProcessingType::Temporal) {
            Err(StoreError::NotFound { what: "processing scale", .. }) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_populate_from_config() {
        let db = Database::open_in_memory().unwrap();
        let cfg = sample_config();
        let (scales, stored) = db.populate_from_config(&cfg).unwrap();
        assert_eq!(scales, 2);
        assert_eq!(stored, 2);

        // Idempotent: same config adds nothing new
        let (_, stored_again) = db.populate_from_config(&cfg).unwrap();
        assert_eq!(stored_again, 0);

        let row = db.configuration_for("temporal_entropy", None).unwrap().unwrap();
        assert_eq!(row.processor_name, "TemporalEntropyProcessor");
        assert_eq!(row.processing_type, ProcessingType::Temporal);
        assert_eq!(row.config_hash.len(), 16);
    }

    #[test]
    fn test_changed_params_version_the_configuration() {
        let db = Database::open_in_memory().unwrap();
        db.populate_from_config(&sample_config()).unwrap();

        let changed = AnalysisConfig::from_yaml_str(
            "config_site_a.yaml",
            "
acoustic_indices:
  spectral:
    chunk_duration_sec: 9.0
    aci:
      processor: ACIProcessor
      params:
        min_freq_hz: 750
",
        )
        .unwrap();
        let (_, stored) = db.populate_from_config(&changed).unwrap();
        assert_eq!(stored, 1);

        // Both parameterizations remain on record; latest wins lookup
        let all: Vec<_> = db
            .list_configurations(Some("config_site_a.yaml"))
            .unwrap()
            .into_iter()
            .filter(|r| r.index_name == "aci")
            .collect();
        assert_eq!(all.len(), 2);
        let latest = db.configuration_for("aci", None).unwrap().unwrap();
        assert!(latest.config_fragment.contains("750"));
    }

    #[test]
    fn test_index_stats_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.index_stats("aci").unwrap().is_none());
        db.upsert_index_stats("aci", IndexStats { min_value: 0.1, max_value: 0.9 }).unwrap();
        let s = db.index_stats("aci").unwrap().unwrap();
        assert_eq!(s.min_value, 0.1);
        assert_eq!(s.max_value, 0.9);
    }

    #[test]
    fn test_non_positive_scale_rejected_by_schema() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.register_scale("c.yaml", ProcessingType::Temporal, 0.0).is_err());
    }
}
