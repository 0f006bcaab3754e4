use chrono::{Duration, NaiveDate, Timelike};
use rusqlite::{OptionalExtension, params};

use super::catalog::{DT_FMT, parse_dt};
use super::models::{NewObservation, WeatherSnapshot};
use super::{Database, StoreError};
use crate::solar::{PeriodThresholds, SolarCalendar, SolarDay, TemporalLabel};

const DATE_FMT: &str = "%Y-%m-%d";

impl Database {
    /// Register a site by coordinates, returning its id. Coordinates are
    /// the identity: re-registering the same point updates the name only.
    pub fn register_site(
        &self,
        name: &str,
        latitude: f64,
        longitude: f64,
        elevation: Option<f64>,
        timezone: Option<&str>,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO weather_sites (name, latitude, longitude, elevation, timezone)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(latitude, longitude) DO UPDATE SET
                 name = excluded.name,
                 elevation = excluded.elevation,
                 timezone = excluded.timezone",
            params![name, latitude, longitude, elevation, timezone],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM weather_sites WHERE latitude = ?1 AND longitude = ?2",
            params![latitude, longitude],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Bulk-load hourly observations for a site. Re-importing the same
    /// hours replaces them, so backfills are safe to repeat.
    pub fn insert_observations(
        &self,
        site_id: i64,
        observations: &[NewObservation],
    ) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO weather_observations
                 (site_id, observed_at, temperature_2m, relative_humidity_2m,
                  precipitation, wind_speed_10m, weather_code, cloud_cover, pressure_msl)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for obs in observations {
                stmt.execute(params![
                    site_id,
                    obs.observed_at.format(DT_FMT).to_string(),
                    obs.temperature_2m,
                    obs.relative_humidity_2m,
                    obs.precipitation,
                    obs.wind_speed_10m,
                    obs.weather_code,
                    obs.cloud_cover,
                    obs.pressure_msl,
                ])?;
            }
        }
        tx.commit()?;
        Ok(observations.len())
    }

    /// Attach each unlinked recording to the site and to the observation
    /// for its hour. Recordings are matched by flooring `recorded_at` to
    /// the hour, which is the observation cadence.
    pub fn link_recordings(&self, site_id: i64) -> Result<usize, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, recorded_at FROM recordings WHERE weather_id IS NULL",
        )?;
        let unlinked = stmt
            .query_map([], |row| {
                let ts: String = row.get(1)?;
                Ok((row.get::<_, i64>(0)?, parse_dt(1, ts)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut linked = 0;
        for (rec_id, recorded_at) in unlinked {
            let hour = recorded_at
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .unwrap_or(recorded_at);
            let obs_id: Option<i64> = self
                .conn
                .query_row(
                    "SELECT id FROM weather_observations
                     WHERE site_id = ?1 AND observed_at = ?2",
                    params![site_id, hour.format(DT_FMT).to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(obs_id) = obs_id {
                self.conn.execute(
                    "UPDATE recordings SET site_id = ?1, weather_id = ?2,
                     updated_at = datetime('now') WHERE id = ?3",
                    params![site_id, obs_id, rec_id],
                )?;
                linked += 1;
            }
        }
        log::info!("linked {linked} recordings to site {site_id} weather");
        Ok(linked)
    }

    /// The linked weather observation for a recording, if any.
    pub fn weather_for_recording(
        &self,
        recording_id: i64,
    ) -> Result<Option<WeatherSnapshot>, StoreError> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT o.observed_at, o.temperature_2m, o.relative_humidity_2m,
                        o.precipitation, o.wind_speed_10m, o.weather_code,
                        o.cloud_cover, o.pressure_msl,
                        s.name, s.latitude, s.longitude
                 FROM recordings r
                 JOIN weather_observations o ON o.id = r.weather_id
                 JOIN weather_sites s ON s.id = o.site_id
                 WHERE r.id = ?1",
                params![recording_id],
                |row| {
                    let ts: String = row.get(0)?;
                    Ok(WeatherSnapshot {
                        observed_at: parse_dt(0, ts)?,
                        temperature_2m: row.get(1)?,
                        relative_humidity_2m: row.get(2)?,
                        precipitation: row.get(3)?,
                        wind_speed_10m: row.get(4)?,
                        weather_code: row.get(5)?,
                        cloud_cover: row.get(6)?,
                        pressure_msl: row.get(7)?,
                        site_name: row.get(8)?,
                        latitude: row.get(9)?,
                        longitude: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    pub fn upsert_solar_day(&self, site_id: i64, day: &SolarDay) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO solar_events (site_id, day, sunrise, sunset)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(site_id, day) DO UPDATE SET
                 sunrise = excluded.sunrise,
                 sunset = excluded.sunset",
            params![
                site_id,
                day.day.format(DATE_FMT).to_string(),
                day.sunrise.format(DT_FMT).to_string(),
                day.sunset.format(DT_FMT).to_string(),
            ],
        )?;
        Ok(())
    }

    /// Solar calendar for a site over an inclusive day range.
    pub fn solar_calendar(
        &self,
        site_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<SolarCalendar, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT day, sunrise, sunset FROM solar_events
             WHERE site_id = ?1 AND day >= ?2 AND day <= ?3
             ORDER BY day",
        )?;
        let days = stmt
            .query_map(
                params![
                    site_id,
                    from.format(DATE_FMT).to_string(),
                    to.format(DATE_FMT).to_string()
                ],
                |row| {
                    let day: String = row.get(0)?;
                    let sunrise: String = row.get(1)?;
                    let sunset: String = row.get(2)?;
                    let day = NaiveDate::parse_from_str(&day, DATE_FMT).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                    Ok(SolarDay {
                        day,
                        sunrise: parse_dt(1, sunrise)?,
                        sunset: parse_dt(2, sunset)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(SolarCalendar::new(days))
    }

    /// Solar-relative label for one recording. Loads the day before and
    /// after the recording's own day so small-hours timestamps resolve to
    /// the previous sunset.
    pub fn temporal_label(
        &self,
        recording_id: i64,
        thresholds: &PeriodThresholds,
    ) -> Result<(TemporalLabel, crate::solar::Period), StoreError> {
        let rec = self.recording(recording_id)?;
        let site_id = rec.site_id.ok_or(StoreError::NotFound {
            what: "site link",
            key: recording_id.to_string(),
        })?;

        let day = rec.recorded_at.date();
        let calendar = self.solar_calendar(
            site_id,
            day - Duration::days(1),
            day + Duration::days(1),
        )?;
        let label = calendar
            .label(rec.recorded_at)
            .ok_or(StoreError::NotFound {
                what: "solar coverage",
                key: format!("site {site_id} around {day}"),
            })?;
        let period = label.period(thresholds);
        Ok((label, period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use crate::db::catalog::tests::test_recording;
    use crate::solar::{Period, SolarEventKind};

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, DT_FMT).unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FMT).unwrap()
    }

    fn observation(hour: &str, temp: f64) -> NewObservation {
        NewObservation {
            observed_at: dt(hour),
            temperature_2m: Some(temp),
            relative_humidity_2m: Some(81.0),
            precipitation: Some(0.0),
            wind_speed_10m: Some(2.3),
            weather_code: Some(3),
            cloud_cover: Some(40.0),
            pressure_msl: Some(1013.2),
        }
    }

    fn seed_solar(db: &Database, site_id: i64) {
        for (day, sunrise, sunset) in [
            ("2025-07-05", "2025-07-05 04:55:00", "2025-07-05 21:31:00"),
            ("2025-07-06", "2025-07-06 04:56:00", "2025-07-06 21:30:00"),
            ("2025-07-07", "2025-07-07 04:57:00", "2025-07-07 21:29:00"),
        ] {
            db.upsert_solar_day(
                site_id,
                &SolarDay { day: d(day), sunrise: dt(sunrise), sunset: dt(sunset) },
            )
            .unwrap();
        }
    }

    #[test]
    fn test_site_registration_is_stable() {
        let db = Database::open_in_memory().unwrap();
        let a = db.register_site("heath", 52.08, 5.56, Some(12.0), Some("Europe/Amsterdam")).unwrap();
        let b = db.register_site("heath-renamed", 52.08, 5.56, Some(12.0), None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_link_and_snapshot() {
        let db = Database::open_in_memory().unwrap();
        let site = db.register_site("heath", 52.08, 5.56, None, None).unwrap();
        db.insert_observations(
            site,
            &[
                observation("2025-07-06 01:00:00", 14.2),
                observation("2025-07-06 02:00:00", 13.8),
            ],
        )
        .unwrap();

        // recorded_at 01:30 floors to the 01:00 observation
        let rec_id = db.upsert_recording(&test_recording("2025/07/20250706_013000.WAV")).unwrap();
        let linked = db.link_recordings(site).unwrap();
        assert_eq!(linked, 1);

        let snap = db.weather_for_recording(rec_id).unwrap().unwrap();
        assert_eq!(snap.observed_at, dt("2025-07-06 01:00:00"));
        assert_eq!(snap.temperature_2m, Some(14.2));
        assert_eq!(snap.site_name, "heath");
    }

    #[test]
    fn test_unmatched_hour_stays_unlinked() {
        let db = Database::open_in_memory().unwrap();
        let site = db.register_site("heath", 52.08, 5.56, None, None).unwrap();
        db.insert_observations(site, &[observation("2025-07-06 12:00:00", 21.0)]).unwrap();

        let rec_id = db.upsert_recording(&test_recording("2025/07/20250706_013000.WAV")).unwrap();
        assert_eq!(db.link_recordings(site).unwrap(), 0);
        assert!(db.weather_for_recording(rec_id).unwrap().is_none());
    }

    #[test]
    fn test_reimport_replaces_observation() {
        let db = Database::open_in_memory().unwrap();
        let site = db.register_site("heath", 52.08, 5.56, None, None).unwrap();
        db.insert_observations(site, &[observation("2025-07-06 01:00:00", 14.2)]).unwrap();
        db.insert_observations(site, &[observation("2025-07-06 01:00:00", 14.9)]).unwrap();

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM weather_observations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_temporal_label_spans_previous_day() {
        let db = Database::open_in_memory().unwrap();
        let site = db.register_site("heath", 52.08, 5.56, None, None).unwrap();
        seed_solar(&db, site);
        db.insert_observations(site, &[observation("2025-07-06 01:00:00", 14.2)]).unwrap();

        let rec_id = db.upsert_recording(&test_recording("2025/07/20250706_013000.WAV")).unwrap();
        db.link_recordings(site).unwrap();

        // 01:30 anchors to the sunset of July 5th
        let (label, period) = db.temporal_label(rec_id, &PeriodThresholds::default()).unwrap();
        assert_eq!(label.previous.0, SolarEventKind::Sunset);
        assert_eq!(label.time_since_last(), "SS+03:59");
        assert_eq!(period, Period::Evening);
    }

    #[test]
    fn test_label_without_site_link_fails() {
        let db = Database::open_in_memory().unwrap();
        let rec_id = db.upsert_recording(&test_recording("2025/07/20250706_013000.WAV")).unwrap();
        assert!(matches!(
            db.temporal_label(rec_id, &PeriodThresholds::default()),
            Err(StoreError::NotFound { what: "site link", .. })
        ));
    }
}
