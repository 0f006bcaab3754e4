use std::collections::BTreeMap;

use rusqlite::params;

use super::models::{
    ChunkValue, IndexSeries, MeasurementRow, ProcessingStatus, ProcessingType, StoreStats,
};
use super::{Database, StoreError};
use crate::chunks::ChunkGrid;

/// Outcome of one batched upsert. Partial success is normal: per-chunk
/// failures are collected here and never block sibling chunks.
#[derive(Debug, Default)]
pub struct UpsertReport {
    pub written: usize,
    pub errors: Vec<StoreError>,
}

impl UpsertReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Database {
    /// Write one index's chunk values for a recording.
    ///
    /// Every chunk is an atomic insert-or-replace on the full uniqueness
    /// tuple (recording, index, chunk). Nothing here deletes a range of
    /// rows: two writers producing disjoint chunk subsets never lose each
    /// other's rows, and two writers racing on the same key converge to
    /// one committed value.
    ///
    /// An unregistered (processing type, index) combination fails the
    /// whole call with `ConfigurationError`. An out-of-range chunk_index
    /// drops that value, flags the recording `partial`, and lets the
    /// siblings proceed.
    pub fn upsert_measurements(
        &self,
        recording_id: i64,
        config_name: &str,
        ptype: ProcessingType,
        index_name: &str,
        values: &[ChunkValue],
    ) -> Result<UpsertReport, StoreError> {
        let rec = self.recording(recording_id)?;
        if rec.processing_status == ProcessingStatus::Skipped {
            return Err(StoreError::DurationTolerance {
                recording_id,
                actual_sec: rec.actual_duration_sec.unwrap_or(rec.nominal_duration_sec),
                nominal_sec: rec.nominal_duration_sec,
            });
        }

        let registered: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM index_configurations
             WHERE config_name = ?1 AND index_name = ?2 AND processing_type = ?3",
            params![config_name, index_name, ptype.as_str()],
            |row| row.get(0),
        )?;
        if registered == 0 {
            return Err(StoreError::Configuration {
                config_name: config_name.to_string(),
                processing_type: ptype.as_str().to_string(),
                index_name: index_name.to_string(),
            });
        }
        let chunk_duration = match self.scale(config_name, ptype)? {
            Some(c) => c,
            None => {
                return Err(StoreError::Configuration {
                    config_name: config_name.to_string(),
                    processing_type: ptype.as_str().to_string(),
                    index_name: index_name.to_string(),
                });
            }
        };

        let grid = ChunkGrid::new(rec.duration_sec(), chunk_duration);
        let mut report = UpsertReport::default();

        // Transaction for throughput only; per-row atomicity is what the
        // contract relies on.
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO measurements
                 (recording_id, index_name, chunk_index, start_time_sec, value,
                  processing_type, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
                 ON CONFLICT(recording_id, index_name, chunk_index) DO UPDATE SET
                     start_time_sec = excluded.start_time_sec,
                     value = excluded.value,
                     processing_type = excluded.processing_type,
                     computed_at = datetime('now')",
            )?;

            for v in values {
                if !grid.contains(v.chunk_index) {
                    report.errors.push(StoreError::Range {
                        recording_id,
                        index_name: index_name.to_string(),
                        chunk_index: v.chunk_index,
                        chunk_count: grid.chunk_count(),
                    });
                    continue;
                }
                stmt.execute(params![
                    recording_id,
                    index_name,
                    v.chunk_index,
                    grid.start_time(v.chunk_index as usize),
                    v.value,
                    ptype.as_str(),
                ])?;
                report.written += 1;
            }
        }
        tx.commit()?;

        if !report.errors.is_empty() {
            self.flag_partial(recording_id)?;
            log::warn!(
                "dropped {} out-of-range chunks for recording {} index '{}'",
                report.errors.len(),
                recording_id,
                index_name
            );
        }
        Ok(report)
    }

    /// Each requested index's series ordered by chunk_index, with explicit
    /// `None` for missing chunks — holes are never silently omitted, since
    /// that would corrupt positional alignment for consumers.
    ///
    /// An absent recording yields an empty result, not an error.
    pub fn query_measurements(
        &self,
        recording_id: i64,
        index_names: Option<&[&str]>,
        ptype: Option<ProcessingType>,
    ) -> Result<Vec<IndexSeries>, StoreError> {
        let rec = match self.recording(recording_id) {
            Ok(r) => r,
            Err(StoreError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut sql = String::from(
            "SELECT index_name, processing_type, chunk_index, value
             FROM measurements WHERE recording_id = ?",
        );
        let mut args: Vec<String> = vec![recording_id.to_string()];
        if let Some(p) = ptype {
            sql.push_str(" AND processing_type = ?");
            args.push(p.as_str().to_string());
        }
        if let Some(names) = index_names {
            sql.push_str(&format!(
                " AND index_name IN ({})",
                vec!["?"; names.len()].join(",")
            ));
            args.extend(names.iter().map(|n| n.to_string()));
        }
        sql.push_str(" ORDER BY index_name, chunk_index");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut grouped: BTreeMap<String, (ProcessingType, Vec<(i64, Option<f64>)>)> =
            BTreeMap::new();
        for (name, ptype_str, chunk, value) in rows {
            let p = ProcessingType::parse(&ptype_str).unwrap_or(ProcessingType::Temporal);
            grouped
                .entry(name)
                .or_insert_with(|| (p, Vec::new()))
                .1
                .push((chunk, value));
        }

        let mut out = Vec::new();
        for (index_name, (p, chunks)) in grouped {
            out.push(self.densify(&index_name, p, rec.duration_sec(), chunks)?);
        }
        Ok(out)
    }

    /// One batched lookup for many recordings, for shard-level reporting.
    /// Result is keyed by recording id; recordings without measurements
    /// are simply absent.
    pub fn query_bulk(
        &self,
        recording_ids: &[i64],
        index_names: Option<&[&str]>,
        ptype: Option<ProcessingType>,
    ) -> Result<BTreeMap<i64, Vec<IndexSeries>>, StoreError> {
        if recording_ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut sql = format!(
            "SELECT recording_id, index_name, processing_type, chunk_index, value
             FROM measurements WHERE recording_id IN ({})",
            vec!["?"; recording_ids.len()].join(",")
        );
        let mut args: Vec<String> = recording_ids.iter().map(|id| id.to_string()).collect();
        if let Some(p) = ptype {
            sql.push_str(" AND processing_type = ?");
            args.push(p.as_str().to_string());
        }
        if let Some(names) = index_names {
            sql.push_str(&format!(
                " AND index_name IN ({})",
                vec!["?"; names.len()].join(",")
            ));
            args.extend(names.iter().map(|n| n.to_string()));
        }
        sql.push_str(" ORDER BY recording_id, index_name, chunk_index");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut grouped: BTreeMap<i64, BTreeMap<String, (ProcessingType, Vec<(i64, Option<f64>)>)>> =
            BTreeMap::new();
        for (rid, name, ptype_str, chunk, value) in rows {
            let p = ProcessingType::parse(&ptype_str).unwrap_or(ProcessingType::Temporal);
            grouped
                .entry(rid)
                .or_default()
                .entry(name)
                .or_insert_with(|| (p, Vec::new()))
                .1
                .push((chunk, value));
        }

        // Durations come from one IN select as well, not a round trip per id
        let dur_sql = format!(
            "SELECT id, nominal_duration_sec, actual_duration_sec
             FROM recordings WHERE id IN ({})",
            vec!["?"; grouped.len()].join(",")
        );
        let mut dur_stmt = self.conn.prepare(&dur_sql)?;
        let durations = dur_stmt
            .query_map(rusqlite::params_from_iter(grouped.keys()), |row| {
                let nominal: f64 = row.get(1)?;
                let actual: Option<f64> = row.get(2)?;
                Ok((row.get::<_, i64>(0)?, actual.unwrap_or(nominal)))
            })?
            .collect::<std::result::Result<BTreeMap<i64, f64>, _>>()?;

        let mut out = BTreeMap::new();
        for (rid, by_index) in grouped {
            let Some(&duration_sec) = durations.get(&rid) else {
                continue;
            };
            let mut series = Vec::new();
            for (index_name, (p, chunks)) in by_index {
                series.push(self.densify(&index_name, p, duration_sec, chunks)?);
            }
            out.insert(rid, series);
        }
        Ok(out)
    }

    /// Project sparse (chunk_index, value) rows onto the registry grid:
    /// length = chunk_count, missing chunks explicit `None`.
    fn densify(
        &self,
        index_name: &str,
        ptype: ProcessingType,
        duration_sec: f64,
        chunks: Vec<(i64, Option<f64>)>,
    ) -> Result<IndexSeries, StoreError> {
        let chunk_duration = match self.configuration_for(index_name, None)? {
            Some(cfg) => self.scale(&cfg.config_name, cfg.processing_type)?,
            None => None,
        };
        // Registry-resolved grid when available; otherwise fall back to
        // the observed extent so pre-registry data stays readable.
        let max_idx = chunks.iter().map(|(k, _)| *k).max().unwrap_or(-1);
        let (chunk_duration, len) = match chunk_duration {
            Some(c) => {
                let count = ChunkGrid::new(duration_sec, c).chunk_count();
                (c, count.max((max_idx + 1) as usize))
            }
            None => (duration_sec.max(0.0), (max_idx + 1) as usize),
        };

        let mut values = vec![None; len];
        for (k, v) in chunks {
            if k >= 0 && (k as usize) < len {
                values[k as usize] = v;
            }
        }
        Ok(IndexSeries {
            index_name: index_name.to_string(),
            processing_type: ptype,
            chunk_duration_sec: chunk_duration,
            values,
        })
    }

    /// Raw measurement rows for one recording (audit/report access).
    pub fn measurement_rows(&self, recording_id: i64) -> Result<Vec<MeasurementRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT recording_id, index_name, processing_type, chunk_index, start_time_sec, value
             FROM measurements WHERE recording_id = ?1
             ORDER BY index_name, chunk_index",
        )?;
        let rows = stmt
            .query_map(params![recording_id], |row| {
                let ptype: String = row.get(2)?;
                Ok(MeasurementRow {
                    recording_id: row.get(0)?,
                    index_name: row.get(1)?,
                    processing_type: ProcessingType::parse(&ptype)
                        .unwrap_or(ProcessingType::Temporal),
                    chunk_index: row.get(3)?,
                    start_time_sec: row.get(4)?,
                    value: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Administrator-invoked deletion for a single identified target.
    /// Never part of the write path, and never a blanket delete: at least
    /// one selector is required.
    pub fn clear_measurements(
        &self,
        recording_id: Option<i64>,
        index_name: Option<&str>,
    ) -> Result<usize, StoreError> {
        if recording_id.is_none() && index_name.is_none() {
            return Err(StoreError::MissingClearTarget);
        }

        let mut conditions = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(id) = recording_id {
            conditions.push("recording_id = ?");
            args.push(id.to_string());
        }
        if let Some(name) = index_name {
            conditions.push("index_name = ?");
            args.push(name.to_string());
        }

        let sql = format!(
            "DELETE FROM measurements WHERE {}",
            conditions.join(" AND ")
        );
        let deleted = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(args.iter()))?;
        log::info!("cleared {deleted} measurement rows");
        Ok(deleted)
    }

    /// Store-wide statistics for reporting.
    pub fn store_stats(&self) -> Result<StoreStats, StoreError> {
        let total_recordings: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM recordings", [], |row| row.get(0))?;
        let recordings_with_values: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT recording_id) FROM measurements",
            [],
            |row| row.get(0),
        )?;
        let total_values: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;

        let mut stmt = self.conn.prepare(
            "SELECT processing_type, index_name, COUNT(*), COUNT(DISTINCT recording_id)
             FROM measurements
             GROUP BY processing_type, index_name
             ORDER BY processing_type, index_name",
        )?;
        let by_index = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut status_stmt = self.conn.prepare(
            "SELECT processing_status, COUNT(*) FROM recordings
             GROUP BY processing_status ORDER BY processing_status",
        )?;
        let status_counts = status_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(StoreStats {
            total_recordings,
            recordings_with_values,
            total_values,
            by_index,
            status_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::db::catalog::tests::test_recording;

    const CONFIG: &str = "config_site_a.yaml";

    const YAML: &str = "
acoustic_indices:
  temporal:
    chunk_duration_sec: 4.5
    temporal_entropy:
      processor: TemporalEntropyProcessor
    temporal_activity:
      processor: TemporalActivityProcessor
  spectral:
    chunk_duration_sec: 9.0
    aci:
      processor: ACIProcessor
";

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let cfg = AnalysisConfig::from_yaml_str(CONFIG, YAML).unwrap();
        db.populate_from_config(&cfg).unwrap();
        let id = db.upsert_recording(&test_recording("2025/07/20250706_013000.WAV")).unwrap();
        db.admit_duration(id, 900.0, 30.0).unwrap();
        (db, id)
    }

    fn chunk_values(range: std::ops::Range<i64>) -> Vec<ChunkValue> {
        range
            .map(|k| ChunkValue { chunk_index: k, value: Some(k as f64 * 0.01) })
            .collect()
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (db, id) = setup();
        let values = chunk_values(0..200);

        let r1 = db
            .upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &values)
            .unwrap();
        let r2 = db
            .upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &values)
            .unwrap();
        assert_eq!(r1.written, 200);
        assert_eq!(r2.written, 200);

        let rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM measurements", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 200);
    }

    #[test]
    fn test_disjoint_writers_preserve_each_other() {
        let (db, id) = setup();
        // Worker A writes the first half, worker B the second
        db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &chunk_values(0..100))
            .unwrap();
        db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &chunk_values(100..200))
            .unwrap();

        let series = db
            .query_measurements(id, Some(&["temporal_entropy"]), None)
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].values.len(), 200);
        assert!(series[0].values.iter().all(|v| v.is_some()));
    }

    #[test]
    fn test_same_key_converges_to_last_value() {
        let (db, id) = setup();
        db.upsert_measurements(
            id,
            CONFIG,
            ProcessingType::Temporal,
            "temporal_entropy",
            &[ChunkValue { chunk_index: 3, value: Some(0.1) }],
        )
        .unwrap();
        db.upsert_measurements(
            id,
            CONFIG,
            ProcessingType::Temporal,
            "temporal_entropy",
            &[ChunkValue { chunk_index: 3, value: Some(0.7) }],
        )
        .unwrap();

        let series = db
            .query_measurements(id, Some(&["temporal_entropy"]), None)
            .unwrap();
        assert_eq!(series[0].values[3], Some(0.7));
        let rows: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM measurements WHERE chunk_index = 3",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_missing_chunks_appear_as_nulls() {
        let (db, id) = setup();
        db.upsert_measurements(
            id,
            CONFIG,
            ProcessingType::Temporal,
            "temporal_entropy",
            &[
                ChunkValue { chunk_index: 0, value: Some(0.5) },
                ChunkValue { chunk_index: 2, value: Some(0.6) },
            ],
        )
        .unwrap();

        let series = db
            .query_measurements(id, Some(&["temporal_entropy"]), None)
            .unwrap();
        // Dense over the full registry grid, not just the written extent
        assert_eq!(series[0].values.len(), 200);
        assert_eq!(series[0].values[0], Some(0.5));
        assert_eq!(series[0].values[1], None);
        assert_eq!(series[0].values[2], Some(0.6));
        assert_eq!(series[0].values[199], None);
    }

    #[test]
    fn test_unregistered_index_fails_that_write_only() {
        let (db, id) = setup();
        match db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "mystery_index", &chunk_values(0..10)) {
            Err(StoreError::Configuration { index_name, .. }) => {
                assert_eq!(index_name, "mystery_index");
            }
            other => panic!("expected Configuration error, got {other:?}"),
        }
        // A sibling write for a registered index still succeeds
        let r = db
            .upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &chunk_values(0..10))
            .unwrap();
        assert_eq!(r.written, 10);
    }

    #[test]
    fn test_wrong_processing_type_is_configuration_error() {
        let (db, id) = setup();
        // aci is registered as spectral, not temporal
        assert!(matches!(
            db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "aci", &chunk_values(0..10)),
            Err(StoreError::Configuration { .. })
        ));
    }

    #[test]
    fn test_out_of_range_chunk_dropped_and_recording_flagged_partial() {
        let (db, id) = setup();
        let mut values = chunk_values(195..200);
        values.push(ChunkValue { chunk_index: 200, value: Some(1.0) });
        values.push(ChunkValue { chunk_index: -1, value: Some(1.0) });

        let report = db
            .upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &values)
            .unwrap();
        assert_eq!(report.written, 5);
        assert_eq!(report.errors.len(), 2);
        assert!(matches!(
            report.errors[0],
            StoreError::Range { chunk_index: 200, chunk_count: 200, .. }
        ));

        let rec = db.recording(id).unwrap();
        assert_eq!(rec.processing_status, ProcessingStatus::Partial);
    }

    #[test]
    fn test_skipped_recording_refuses_writes_but_queries_empty() {
        let (db, id) = setup();
        let _ = db.admit_duration(id, 850.0, 30.0); // outside 900 ± 30

        assert!(matches!(
            db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &chunk_values(0..10)),
            Err(StoreError::DurationTolerance { .. })
        ));

        // Empty result, not an error
        let series = db.query_measurements(id, None, None).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_query_absent_recording_is_empty() {
        let (db, _) = setup();
        assert!(db.query_measurements(999, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_query_filters_by_processing_type() {
        let (db, id) = setup();
        db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &chunk_values(0..200))
            .unwrap();
        db.upsert_measurements(id, CONFIG, ProcessingType::Spectral, "aci", &chunk_values(0..100))
            .unwrap();

        let all = db.query_measurements(id, None, None).unwrap();
        assert_eq!(all.len(), 2);

        let spectral = db
            .query_measurements(id, None, Some(ProcessingType::Spectral))
            .unwrap();
        assert_eq!(spectral.len(), 1);
        assert_eq!(spectral[0].index_name, "aci");
        // 900s at 9.0s spectral chunks
        assert_eq!(spectral[0].values.len(), 100);
        assert_eq!(spectral[0].chunk_duration_sec, 9.0);
    }

    #[test]
    fn test_query_bulk_is_one_lookup() {
        let (db, id1) = setup();
        let id2 = db.upsert_recording(&test_recording("2025/07/f2.WAV")).unwrap();
        db.admit_duration(id2, 900.0, 30.0).unwrap();

        db.upsert_measurements(id1, CONFIG, ProcessingType::Temporal, "temporal_entropy", &chunk_values(0..200))
            .unwrap();
        db.upsert_measurements(id2, CONFIG, ProcessingType::Temporal, "temporal_entropy", &chunk_values(0..50))
            .unwrap();

        let bulk = db
            .query_bulk(&[id1, id2, 999], Some(&["temporal_entropy"]), None)
            .unwrap();
        assert_eq!(bulk.len(), 2);
        assert_eq!(bulk[&id1][0].values.len(), 200);
        // Sparse coverage still densifies to the full grid
        assert_eq!(bulk[&id2][0].values.len(), 200);
        assert_eq!(bulk[&id2][0].values.iter().filter(|v| v.is_some()).count(), 50);
    }

    #[test]
    fn test_clear_requires_a_target() {
        let (db, id) = setup();
        db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &chunk_values(0..10))
            .unwrap();

        assert!(matches!(
            db.clear_measurements(None, None),
            Err(StoreError::MissingClearTarget)
        ));

        let deleted = db.clear_measurements(Some(id), Some("temporal_entropy")).unwrap();
        assert_eq!(deleted, 10);
    }

    #[test]
    fn test_clear_single_target_leaves_siblings() {
        let (db, id) = setup();
        db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &chunk_values(0..10))
            .unwrap();
        db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_activity", &chunk_values(0..10))
            .unwrap();

        db.clear_measurements(Some(id), Some("temporal_entropy")).unwrap();
        let series = db.query_measurements(id, None, None).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].index_name, "temporal_activity");
    }

    #[test]
    fn test_report_view_joins_catalog() {
        let (db, id) = setup();
        db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &chunk_values(0..5))
            .unwrap();

        let (volume, rows): (String, i64) = db
            .conn
            .query_row(
                "SELECT volume, COUNT(*) FROM v_measurement_report
                 WHERE recording_id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(volume, "moth-a");
        assert_eq!(rows, 5);
    }

    #[test]
    fn test_store_stats() {
        let (db, id) = setup();
        db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &chunk_values(0..200))
            .unwrap();
        db.upsert_measurements(id, CONFIG, ProcessingType::Spectral, "aci", &chunk_values(0..100))
            .unwrap();

        let stats = db.store_stats().unwrap();
        assert_eq!(stats.total_recordings, 1);
        assert_eq!(stats.recordings_with_values, 1);
        assert_eq!(stats.total_values, 300);
        assert_eq!(stats.by_index.len(), 2);
    }

    #[test]
    fn test_two_workers_race_on_same_recording() {
        // Two independent connections (the process model) write
        // overlapping chunk sets for temporal_entropy on the same
        // recording. After both finish: exactly one row per chunk, and no
        // rows lost from chunks only one worker computed.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.db");

        let id = {
            let db = Database::open(&path).unwrap();
            let cfg = AnalysisConfig::from_yaml_str(CONFIG, YAML).unwrap();
            db.populate_from_config(&cfg).unwrap();
            let id = db.upsert_recording(&test_recording("2025/07/race.WAV")).unwrap();
            db.admit_duration(id, 900.0, 30.0).unwrap();
            id
        };

        let spawn_worker = |range: std::ops::Range<i64>| {
            let path = path.clone();
            std::thread::spawn(move || {
                let db = Database::open(&path).unwrap();
                let values = chunk_values(range);
                db.upsert_measurements(id, CONFIG, ProcessingType::Temporal, "temporal_entropy", &values)
                    .unwrap();
            })
        };

        // Overlap on 50..150; 0..50 and 150..200 each written by one worker
        let a = spawn_worker(0..150);
        let b = spawn_worker(50..200);
        a.join().unwrap();
        b.join().unwrap();

        let db = Database::open(&path).unwrap();
        let series = db
            .query_measurements(id, Some(&["temporal_entropy"]), None)
            .unwrap();
        assert_eq!(series[0].values.len(), 200);
        assert!(series[0].values.iter().all(|v| v.is_some()));

        let rows: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM measurements WHERE recording_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rows, 200);
    }
}
