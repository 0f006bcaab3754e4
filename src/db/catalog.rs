use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{Row, params};

use super::models::{NewRecording, ProcessingStatus, Recording};
use super::{Database, StoreError};
use crate::shard::ShardSpec;

pub(crate) const DT_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn parse_dt(idx: usize, s: String) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&s, DT_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Filters for catalog search. All optional; `limit` caps the result.
#[derive(Debug, Clone)]
pub struct RecordingFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub time_from: Option<NaiveTime>,
    pub time_to: Option<NaiveTime>,
    pub device_id: Option<String>,
    pub status: Option<ProcessingStatus>,
    pub limit: usize,
}

impl Default for RecordingFilter {
    fn default() -> Self {
        Self {
            date_from: None,
            date_to: None,
            time_from: None,
            time_to: None,
            device_id: None,
            status: None,
            limit: 100,
        }
    }
}

fn recording_from_row(row: &Row) -> rusqlite::Result<Recording> {
    let recorded_at: String = row.get(3)?;
    let status: String = row.get(9)?;
    Ok(Recording {
        id: row.get(0)?,
        volume: row.get(1)?,
        relative_path: row.get(2)?,
        recorded_at: parse_dt(3, recorded_at)?,
        nominal_duration_sec: row.get(4)?,
        actual_duration_sec: row.get(5)?,
        sample_rate_hz: row.get(6)?,
        device_id: row.get(7)?,
        site_id: row.get(8)?,
        processing_status: ProcessingStatus::parse(&status).unwrap_or(ProcessingStatus::Error),
        weather_id: row.get(10)?,
    })
}

const RECORDING_COLS: &str = "id, volume, relative_path, recorded_at, nominal_duration_sec, \
     actual_duration_sec, sample_rate_hz, device_id, site_id, processing_status, weather_id";

impl Database {
    /// Insert or update a recording, keyed by (volume, relative_path).
    /// Returns the stable surrogate id; re-ingesting never reassigns it.
    pub fn upsert_recording(&self, r: &NewRecording) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO recordings (
                volume, relative_path, recorded_at, nominal_duration_sec,
                actual_duration_sec, sample_rate_hz, device_id, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
            ON CONFLICT(volume, relative_path) DO UPDATE SET
                recorded_at = excluded.recorded_at,
                nominal_duration_sec = excluded.nominal_duration_sec,
                actual_duration_sec = excluded.actual_duration_sec,
                sample_rate_hz = excluded.sample_rate_hz,
                device_id = excluded.device_id,
                updated_at = datetime('now')
            ",
            params![
                r.volume,
                r.relative_path,
                r.recorded_at.format(DT_FMT).to_string(),
                r.nominal_duration_sec,
                r.actual_duration_sec,
                r.sample_rate_hz,
                r.device_id,
            ],
        )?;

        let id: i64 = self.conn.query_row(
            "SELECT id FROM recordings WHERE volume = ?1 AND relative_path = ?2",
            params![r.volume, r.relative_path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Single-match lookup; absence is a reported failure.
    pub fn recording(&self, id: i64) -> Result<Recording, StoreError> {
        let sql = format!("SELECT {RECORDING_COLS} FROM recordings WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id], recording_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                    what: "recording",
                    key: id.to_string(),
                },
                other => other.into(),
            })
    }

    pub fn recording_by_location(
        &self,
        volume: &str,
        relative_path: &str,
    ) -> Result<Option<Recording>, StoreError> {
        let sql =
            format!("SELECT {RECORDING_COLS} FROM recordings WHERE volume = ?1 AND relative_path = ?2");
        match self
            .conn
            .query_row(&sql, params![volume, relative_path], recording_from_row)
        {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move a recording to a new physical location. Identity (and every
    /// measurement hanging off it) is untouched.
    pub fn relocate_recording(
        &self,
        id: i64,
        volume: &str,
        relative_path: &str,
    ) -> Result<(), StoreError> {
        let n = self.conn.execute(
            "UPDATE recordings SET volume = ?1, relative_path = ?2, updated_at = datetime('now')
             WHERE id = ?3",
            params![volume, relative_path, id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "recording",
                key: id.to_string(),
            });
        }
        Ok(())
    }

    /// List recordings matching date/time-range filters, capped, ordered
    /// by recording timestamp. Empty result, never an error, when nothing
    /// matches.
    pub fn search_recordings(&self, f: &RecordingFilter) -> Result<Vec<Recording>, StoreError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(d) = f.date_from {
            conditions.push("DATE(recorded_at) >= ?".into());
            args.push(d.format("%Y-%m-%d").to_string());
        }
        if let Some(d) = f.date_to {
            conditions.push("DATE(recorded_at) <= ?".into());
            args.push(d.format("%Y-%m-%d").to_string());
        }
        if let Some(t) = f.time_from {
            conditions.push("TIME(recorded_at) >= ?".into());
            args.push(t.format("%H:%M:%S").to_string());
        }
        if let Some(t) = f.time_to {
            conditions.push("TIME(recorded_at) <= ?".into());
            args.push(t.format("%H:%M:%S").to_string());
        }
        if let Some(ref dev) = f.device_id {
            conditions.push("device_id = ?".into());
            args.push(dev.clone());
        }
        if let Some(status) = f.status {
            conditions.push("processing_status = ?".into());
            args.push(status.as_str().to_string());
        }

        let where_clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };
        let sql = format!(
            "SELECT {RECORDING_COLS} FROM recordings WHERE {where_clause}
             ORDER BY recorded_at LIMIT ?"
        );
        args.push(f.limit.to_string());

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), recording_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_processing_status(
        &self,
        id: i64,
        status: ProcessingStatus,
    ) -> Result<(), StoreError> {
        let n = self.conn.execute(
            "UPDATE recordings SET processing_status = ?1, updated_at = datetime('now')
             WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "recording",
                key: id.to_string(),
            });
        }
        Ok(())
    }

    /// Escalate a recording to `partial` after an out-of-range chunk write.
    /// Only a `normal` recording is escalated; `skipped`/`error` stand.
    pub fn flag_partial(&self, id: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE recordings SET processing_status = 'partial', updated_at = datetime('now')
             WHERE id = ?1 AND processing_status = 'normal'",
            params![id],
        )?;
        Ok(())
    }

    /// Record the measured duration and admit or skip the recording.
    ///
    /// Outside `nominal ± tolerance` the recording is marked `skipped` and
    /// excluded from measurement writes, but stays in the catalog for
    /// navigation. Within tolerance a previously skipped recording is
    /// re-admitted.
    pub fn admit_duration(
        &self,
        id: i64,
        actual_sec: f64,
        tolerance_sec: f64,
    ) -> Result<(), StoreError> {
        let rec = self.recording(id)?;
        self.conn.execute(
            "UPDATE recordings SET actual_duration_sec = ?1, updated_at = datetime('now')
             WHERE id = ?2",
            params![actual_sec, id],
        )?;

        if (actual_sec - rec.nominal_duration_sec).abs() > tolerance_sec {
            self.set_processing_status(id, ProcessingStatus::Skipped)?;
            log::warn!(
                "recording {} skipped: duration {:.1}s outside {:.1}s ± {:.1}s",
                id,
                actual_sec,
                rec.nominal_duration_sec,
                tolerance_sec
            );
            return Err(StoreError::DurationTolerance {
                recording_id: id,
                actual_sec,
                nominal_sec: rec.nominal_duration_sec,
            });
        }

        if rec.processing_status == ProcessingStatus::Skipped {
            self.set_processing_status(id, ProcessingStatus::Normal)?;
        }
        Ok(())
    }

    /// One shard's candidate recordings, ordered by id. Skipped recordings
    /// are excluded from computation and therefore from the candidate set.
    pub fn shard_recordings(&self, shard: &ShardSpec) -> Result<Vec<Recording>, StoreError> {
        let sql = format!(
            "SELECT {RECORDING_COLS} FROM recordings
             WHERE (id % ?1) = ?2 AND processing_status != 'skipped'
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![shard.count, shard.index], recording_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn catalog_ids(&self) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT id FROM recordings ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Distinct index names present in the store.
    pub fn list_index_names(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT index_name FROM measurements ORDER BY index_name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }
}
