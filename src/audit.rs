//! Parallel verification of stored measurements against the chunk grid.
//!
//! The store's write path already rejects out-of-range chunks, but months
//! of data predate that guard and ad-hoc scripts have touched the file.
//! The audit re-derives each recording's grid from the registry and checks
//! every stored row against it. Work is partitioned by the same shard rule
//! the workers use, one connection per shard.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;

use crate::chunks::ChunkGrid;
use crate::db::{Database, StoreError};
use crate::shard::{ShardError, ShardSpec};

const START_TIME_EPSILON: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error(transparent)]
    Shard(#[from] ShardError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuditProblem {
    /// chunk_index outside the grid derived from the registered scale.
    OutOfRange { chunk_index: i64, chunk_count: usize },
    /// start_time_sec disagrees with chunk_index * chunk_duration.
    StartTimeDrift { expected: f64, stored: f64 },
    /// No registered configuration resolves this index to a scale.
    UnresolvedScale,
}

#[derive(Debug, Clone)]
pub struct AuditFinding {
    pub recording_id: i64,
    pub index_name: String,
    pub chunk_index: i64,
    pub problem: AuditProblem,
}

#[derive(Debug, Default)]
pub struct AuditReport {
    pub recordings_checked: usize,
    pub rows_checked: usize,
    pub findings: Vec<AuditFinding>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    fn merge(mut self, other: AuditReport) -> AuditReport {
        self.recordings_checked += other.recordings_checked;
        self.rows_checked += other.rows_checked;
        self.findings.extend(other.findings);
        self
    }
}

/// Audit the whole catalog with `workers` parallel shards.
pub fn audit_catalog(db_path: &Path, workers: usize) -> Result<AuditReport, AuditError> {
    let count = workers.max(1) as u32;
    let shards = (0..count)
        .map(|i| ShardSpec::new(i, count))
        .collect::<Result<Vec<_>, _>>()?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(count as usize)
        .build()?;

    let path = PathBuf::from(db_path);
    let reports = pool.install(|| {
        shards
            .into_par_iter()
            .map(|shard| audit_shard(&path, shard))
            .collect::<Result<Vec<_>, _>>()
    })?;

    let report = reports
        .into_iter()
        .fold(AuditReport::default(), AuditReport::merge);
    log::info!(
        "audit: {} recordings, {} rows, {} findings",
        report.recordings_checked,
        report.rows_checked,
        report.findings.len()
    );
    Ok(report)
}

/// Audit one shard over its own connection.
fn audit_shard(db_path: &Path, shard: ShardSpec) -> Result<AuditReport, AuditError> {
    let db = Database::open(db_path).map_err(StoreError::Db)?;
    let mut report = AuditReport::default();

    for rec in db.shard_recordings(&shard)? {
        report.recordings_checked += 1;
        let rows = db.measurement_rows(rec.id)?;

        let mut grid: Option<(String, Option<ChunkGrid>)> = None;
        for row in rows {
            report.rows_checked += 1;

            // Rows come back ordered by index_name; resolve each grid once
            if grid.as_ref().map(|(n, _)| n.as_str()) != Some(row.index_name.as_str()) {
                let resolved = resolve_grid(&db, &row.index_name, rec.duration_sec())?;
                grid = Some((row.index_name.clone(), resolved));
            }
            let Some((_, resolved)) = &grid else { continue };

            let Some(g) = resolved else {
                report.findings.push(AuditFinding {
                    recording_id: rec.id,
                    index_name: row.index_name.clone(),
                    chunk_index: row.chunk_index,
                    problem: AuditProblem::UnresolvedScale,
                });
                continue;
            };

            if !g.contains(row.chunk_index) {
                report.findings.push(AuditFinding {
                    recording_id: rec.id,
                    index_name: row.index_name.clone(),
                    chunk_index: row.chunk_index,
                    problem: AuditProblem::OutOfRange {
                        chunk_index: row.chunk_index,
                        chunk_count: g.chunk_count(),
                    },
                });
                continue;
            }

            let expected = g.start_time(row.chunk_index as usize);
            if (expected - row.start_time_sec).abs() > START_TIME_EPSILON {
                report.findings.push(AuditFinding {
                    recording_id: rec.id,
                    index_name: row.index_name.clone(),
                    chunk_index: row.chunk_index,
                    problem: AuditProblem::StartTimeDrift {
                        expected,
                        stored: row.start_time_sec,
                    },
                });
            }
        }
    }
    Ok(report)
}

fn resolve_grid(
    db: &Database,
    index_name: &str,
    duration_sec: f64,
) -> Result<Option<ChunkGrid>, StoreError> {
    let Some(cfg) = db.configuration_for(index_name, None)? else {
        return Ok(None);
    };
    let Some(chunk) = db.scale(&cfg.config_name, cfg.processing_type)? else {
        return Ok(None);
    };
    Ok(Some(ChunkGrid::new(duration_sec, chunk)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::db::catalog::tests::test_recording;
    use crate::db::models::{ChunkValue, ProcessingType};

    const CONFIG: &str = "config_site_a.yaml";

    const YAML: &str = "
acoustic_indices:
  temporal:
    chunk_duration_sec: 4.5
    temporal_entropy:
      processor: TemporalEntropyProcessor
";

    fn seeded_db(dir: &tempfile::TempDir) -> (std::path::PathBuf, i64) {
        let path = dir.path().join("audit.db");
        let db = Database::open(&path).unwrap();
        let cfg = AnalysisConfig::from_yaml_str(CONFIG, YAML).unwrap();
        db.populate_from_config(&cfg).unwrap();

        let id = db.upsert_recording(&test_recording("2025/07/20250706_013000.WAV")).unwrap();
        db.admit_duration(id, 900.0, 30.0).unwrap();
        let values: Vec<ChunkValue> = (0..200)
            .map(|k| ChunkValue { chunk_index: k, value: Some(k as f64 * 0.01) })
            .collect();
        db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &values)
            .unwrap();
        (path, id)
    }

    #[test]
    fn test_clean_store_audits_clean() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = seeded_db(&dir);

        let report = audit_catalog(&path, 4).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.recordings_checked, 1);
        assert_eq!(report.rows_checked, 200);
    }

    #[test]
    fn test_tampered_start_time_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let (path, id) = seeded_db(&dir);

        {
            let db = Database::open(&path).unwrap();
            db.conn
                .execute(
                    "UPDATE measurements SET start_time_sec = 123.0
                     WHERE recording_id = ?1 AND chunk_index = 7",
                    rusqlite::params![id],
                )
                .unwrap();
        }

        let report = audit_catalog(&path, 2).unwrap();
        assert_eq!(report.findings.len(), 1);
        let f = &report.findings[0];
        assert_eq!(f.chunk_index, 7);
        assert_eq!(
            f.problem,
            AuditProblem::StartTimeDrift { expected: 31.5, stored: 123.0 }
        );
    }

    #[test]
    fn test_legacy_out_of_range_row_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let (path, id) = seeded_db(&dir);

        {
            // Simulate a pre-guard row written past the end of the grid
            let db = Database::open(&path).unwrap();
            db.conn
                .execute(
                    "INSERT INTO measurements
                     (recording_id, index_name, chunk_index, start_time_sec, value, processing_type)
                     VALUES (?1, 'temporal_entropy', 250, 1125.0, 0.5, 'temporal')",
                    rusqlite::params![id],
                )
                .unwrap();
        }

        let report = audit_catalog(&path, 1).unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(
            report.findings[0].problem,
            AuditProblem::OutOfRange { chunk_index: 250, chunk_count: 200 }
        );
    }
}
