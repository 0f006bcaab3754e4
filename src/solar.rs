//! Solar-relative temporal labeling.
//!
//! Nocturnal field recordings are meaningless on a wall clock: 01:30 in
//! June and 01:30 in December are different acoustic worlds. Every
//! recording instead gets labeled relative to the nearest sunrise/sunset,
//! e.g. `SS+02:15` (two and a quarter hours after sunset).

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolarEventKind {
    Sunrise,
    Sunset,
}

impl SolarEventKind {
    pub fn code(&self) -> &'static str {
        match self {
            SolarEventKind::Sunrise => "SR",
            SolarEventKind::Sunset => "SS",
        }
    }
}

/// Sunrise and sunset for one calendar day at one site, in site-local time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarDay {
    pub day: NaiveDate,
    pub sunrise: NaiveDateTime,
    pub sunset: NaiveDateTime,
}

/// A span of consecutive solar days, indexed for previous/next event
/// lookups around an arbitrary timestamp.
#[derive(Debug, Clone, Default)]
pub struct SolarCalendar {
    days: BTreeMap<NaiveDate, SolarDay>,
}

impl SolarCalendar {
    pub fn new(days: impl IntoIterator<Item = SolarDay>) -> Self {
        Self {
            days: days.into_iter().map(|d| (d.day, d)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn day(&self, day: NaiveDate) -> Option<&SolarDay> {
        self.days.get(&day)
    }

    /// Most recent sunrise or sunset at or before `at`. Looks back through
    /// earlier calendar days when `at` precedes both events of its own day
    /// (small hours before dawn).
    pub fn previous_event(&self, at: NaiveDateTime) -> Option<(SolarEventKind, NaiveDateTime)> {
        self.days
            .range(..=at.date())
            .rev()
            .flat_map(|(_, d)| {
                [
                    (SolarEventKind::Sunset, d.sunset),
                    (SolarEventKind::Sunrise, d.sunrise),
                ]
            })
            .find(|(_, t)| *t <= at)
    }

    /// Earliest sunrise or sunset strictly after `at`.
    pub fn next_event(&self, at: NaiveDateTime) -> Option<(SolarEventKind, NaiveDateTime)> {
        self.days
            .range(at.date()..)
            .flat_map(|(_, d)| {
                [
                    (SolarEventKind::Sunrise, d.sunrise),
                    (SolarEventKind::Sunset, d.sunset),
                ]
            })
            .find(|(_, t)| *t > at)
    }

    pub fn label(&self, at: NaiveDateTime) -> Option<TemporalLabel> {
        let previous = self.previous_event(at)?;
        let next = self.next_event(at);
        Some(TemporalLabel { at, previous, next })
    }
}

/// A timestamp anchored to its surrounding solar events.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalLabel {
    pub at: NaiveDateTime,
    pub previous: (SolarEventKind, NaiveDateTime),
    pub next: Option<(SolarEventKind, NaiveDateTime)>,
}

impl TemporalLabel {
    /// `SR+01:30` style: signed offset from the most recent event. A
    /// timestamp exactly at sunrise reads `SR+00:00`.
    pub fn time_since_last(&self) -> String {
        let (kind, t) = self.previous;
        format!("{}+{}", kind.code(), format_offset(self.at - t))
    }

    /// `SS-00:45` style: time remaining until the next event.
    pub fn time_to_next(&self) -> Option<String> {
        let (kind, t) = self.next?;
        Some(format!("{}-{}", kind.code(), format_offset(t - self.at)))
    }

    /// Minutes since the previous event, for period classification.
    pub fn minutes_since_last(&self) -> i64 {
        (self.at - self.previous.1).num_minutes()
    }

    pub fn period(&self, thresholds: &PeriodThresholds) -> Period {
        let m = self.minutes_since_last();
        match self.previous.0 {
            SolarEventKind::Sunrise => {
                if m <= thresholds.dawn_window_min {
                    Period::Dawn
                } else {
                    Period::Day
                }
            }
            SolarEventKind::Sunset => {
                if m <= thresholds.dusk_window_min {
                    Period::Dusk
                } else if m <= thresholds.evening_end_min {
                    Period::Evening
                } else {
                    Period::Night
                }
            }
        }
    }
}

fn format_offset(delta: chrono::Duration) -> String {
    let total = delta.num_minutes().abs();
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Coarse ecological periods derived from the solar offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Dawn,
    Day,
    Dusk,
    Evening,
    Night,
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Period::Dawn => "dawn",
            Period::Day => "day",
            Period::Dusk => "dusk",
            Period::Evening => "evening",
            Period::Night => "night",
        };
        f.write_str(s)
    }
}

/// Period boundaries in minutes after the anchoring event. The dusk/evening
/// split is deliberately configurable: field teams disagree on where dusk
/// ends, so the defaults are only a convention.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PeriodThresholds {
    pub dawn_window_min: i64,
    pub dusk_window_min: i64,
    pub evening_end_min: i64,
}

impl Default for PeriodThresholds {
    fn default() -> Self {
        Self {
            dawn_window_min: 120,
            dusk_window_min: 120,
            evening_end_min: 300,
        }
    }
}
