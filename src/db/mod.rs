pub mod catalog;
pub mod measurements;
pub mod models;
pub mod registry;
pub mod weather;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Storage-contract errors. Every variant carries enough identity
/// (recording / index / chunk) for a deterministic retry once the cause
/// is fixed.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Write referenced an (index, processing_type) combination that was
    /// never registered for the config. Fatal to that write only.
    #[error("unregistered index '{index_name}' ({processing_type}) in config '{config_name}'")]
    Configuration {
        config_name: String,
        processing_type: String,
        index_name: String,
    },

    /// chunk_index outside the valid range for the recording's registered
    /// chunk duration. The offending value is dropped and the recording
    /// flagged `partial`.
    #[error(
        "chunk {chunk_index} out of range 0..{chunk_count} for recording {recording_id} index '{index_name}'"
    )]
    Range {
        recording_id: i64,
        index_name: String,
        chunk_index: i64,
        chunk_count: usize,
    },

    /// Recording duration outside the configured tolerance of nominal.
    /// Marked `skipped` at catalog level, excluded from computation.
    #[error(
        "recording {recording_id} skipped: duration {actual_sec:.1}s outside tolerance of nominal {nominal_sec:.1}s"
    )]
    DurationTolerance {
        recording_id: i64,
        actual_sec: f64,
        nominal_sec: f64,
    },

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// `clear` was invoked without a recording or index target. Blanket
    /// deletes were the historical corruption source and are refused.
    #[error("refusing blanket delete: clear requires a recording or index target")]
    MissingClearTarget,

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Db(DbError::Sqlite(e))
    }
}

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL + busy timeout: many independent worker processes share this
        // file for months. Concurrent writers block briefly instead of
        // failing, and readers never block writers.
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.pragma_update(None, "busy_timeout", 30_000)?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }
        if version < 2 {
            self.migrate_v2()?;
        }

        self.conn.pragma_update(None, "user_version", 2)?;
        Ok(())
    }

    /// V1: catalog, scale registry, index configurations, measurements.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS recordings (
                id                   INTEGER PRIMARY KEY AUTOINCREMENT,

                -- Physical location, decoupled from identity so relocation
                -- never orphans measurements
                volume               TEXT NOT NULL,
                relative_path        TEXT NOT NULL,

                recorded_at          TEXT NOT NULL,
                nominal_duration_sec REAL NOT NULL,
                actual_duration_sec  REAL,
                sample_rate_hz       INTEGER NOT NULL,
                device_id            TEXT,
                processing_status    TEXT NOT NULL DEFAULT 'normal',

                created_at           TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at           TEXT NOT NULL DEFAULT (datetime('now')),

                UNIQUE(volume, relative_path)
            );

            CREATE INDEX IF NOT EXISTS idx_recordings_recorded_at ON recordings(recorded_at);
            CREATE INDEX IF NOT EXISTS idx_recordings_device ON recordings(device_id);
            CREATE INDEX IF NOT EXISTS idx_recordings_status ON recordings(processing_status);

            CREATE TABLE IF NOT EXISTS processing_scales (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                config_name        TEXT NOT NULL,
                processing_type    TEXT NOT NULL,
                chunk_duration_sec REAL NOT NULL CHECK (chunk_duration_sec > 0),
                created_at         TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(config_name, processing_type)
            );

            CREATE TABLE IF NOT EXISTS index_configurations (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                config_name     TEXT NOT NULL,
                index_name      TEXT NOT NULL,
                processing_type TEXT NOT NULL,
                processor_name  TEXT NOT NULL,
                config_fragment TEXT NOT NULL,
                config_hash     TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(config_name, index_name, config_hash)
            );

            CREATE INDEX IF NOT EXISTS idx_config_index_name
                ON index_configurations(config_name, index_name);

            CREATE TABLE IF NOT EXISTS measurements (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                recording_id    INTEGER NOT NULL REFERENCES recordings(id),
                index_name      TEXT NOT NULL,
                chunk_index     INTEGER NOT NULL,
                start_time_sec  REAL NOT NULL,
                value           REAL,
                processing_type TEXT NOT NULL,
                computed_at     TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(recording_id, index_name, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_measurements_recording ON measurements(recording_id);
            CREATE INDEX IF NOT EXISTS idx_measurements_index ON measurements(index_name);

            -- Catalog-wide per-index range, used for cross-recording
            -- normalization. Derived cache; measurements stay canonical.
            CREATE TABLE IF NOT EXISTS index_stats (
                index_name  TEXT PRIMARY KEY,
                min_value   REAL NOT NULL,
                max_value   REAL NOT NULL,
                computed_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Reporting view. Read-only by convention: never a write target.
            CREATE VIEW IF NOT EXISTS v_measurement_report AS
            SELECT m.recording_id, r.volume, r.relative_path, r.recorded_at,
                   r.device_id, r.processing_status,
                   m.index_name, m.processing_type, m.chunk_index,
                   m.start_time_sec, m.value, m.computed_at
            FROM measurements m
            JOIN recordings r ON r.id = m.recording_id;
            ",
        )?;
        Ok(())
    }

    /// V2: weather sites/observations, solar events, linkage columns.
    fn migrate_v2(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS weather_sites (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                name      TEXT NOT NULL,
                latitude  REAL NOT NULL,
                longitude REAL NOT NULL,
                elevation REAL,
                timezone  TEXT,
                UNIQUE(latitude, longitude)
            );

            CREATE TABLE IF NOT EXISTS weather_observations (
                id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id              INTEGER NOT NULL REFERENCES weather_sites(id),
                observed_at          TEXT NOT NULL,
                temperature_2m       REAL,
                relative_humidity_2m REAL,
                precipitation        REAL,
                wind_speed_10m       REAL,
                weather_code         INTEGER,
                cloud_cover          REAL,
                pressure_msl         REAL,
                created_at           TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(site_id, observed_at)
            );

            CREATE TABLE IF NOT EXISTS solar_events (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id INTEGER NOT NULL REFERENCES weather_sites(id),
                day     TEXT NOT NULL,
                sunrise TEXT NOT NULL,
                sunset  TEXT NOT NULL,
                UNIQUE(site_id, day)
            );
            ",
        )?;

        for col in [
            "site_id INTEGER REFERENCES weather_sites(id)",
            "weather_id INTEGER REFERENCES weather_observations(id)",
        ] {
            // SQLite has no IF NOT EXISTS for ADD COLUMN; ignore duplicates
            let sql = format!("ALTER TABLE recordings ADD COLUMN {col}");
            match self.conn.execute(&sql, []) {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ffi::ErrorCode::Unknown
                        || err.extended_code == 1 => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_migrates() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chorus.db");
        drop(Database::open(&path).unwrap());
        // Re-opening an already-migrated file must not fail
        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM recordings", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
