//! Time-of-day primitives: wall-clock times, expected windows and shift slots.
//!
//! All values are seconds since local midnight. Conversion between UTC
//! instants and local time-of-day happens in the reconcile crate, which owns
//! the facility time zone.

use std::fmt;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

pub const SECS_PER_DAY: u32 = 86_400;

// ---------------------------------------------------------------------------
// TimeOfDay
// ---------------------------------------------------------------------------

/// A wall-clock time with second precision, serialized as `"HH:MM"` or
/// `"HH:MM:SS"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeOfDayParseError {
    pub raw: String,
}

impl fmt::Display for TimeOfDayParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day '{}': expected HH:MM or HH:MM:SS", self.raw)
    }
}

impl std::error::Error for TimeOfDayParseError {}

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    /// Build from hour/minute/second; `None` when any component is out of range.
    pub fn from_hms(h: u32, m: u32, s: u32) -> Option<Self> {
        if h < 24 && m < 60 && s < 60 {
            Some(Self(h * 3600 + m * 60 + s))
        } else {
            None
        }
    }

    pub fn from_secs(secs: u32) -> Option<Self> {
        (secs < SECS_PER_DAY).then_some(Self(secs))
    }

    pub fn from_naive(t: NaiveTime) -> Self {
        Self(t.num_seconds_from_midnight())
    }

    pub fn secs(self) -> u32 {
        self.0
    }

    pub fn to_naive(self) -> NaiveTime {
        // `self.0 < SECS_PER_DAY` is a construction invariant.
        NaiveTime::from_num_seconds_from_midnight_opt(self.0, 0).unwrap_or(NaiveTime::MIN)
    }

    pub fn parse(raw: &str) -> Result<Self, TimeOfDayParseError> {
        let err = || TimeOfDayParseError {
            raw: raw.to_string(),
        };
        let parts: Vec<&str> = raw.trim().split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(err());
        }
        let mut nums = [0u32; 3];
        for (i, p) in parts.iter().enumerate() {
            if p.is_empty() || p.len() > 2 || !p.chars().all(|c| c.is_ascii_digit()) {
                return Err(err());
            }
            nums[i] = p.parse().map_err(|_| err())?;
        }
        Self::from_hms(nums[0], nums[1], nums[2]).ok_or_else(err)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s) = (self.0 / 3600, (self.0 / 60) % 60, self.0 % 60);
        if s == 0 {
            write!(f, "{h:02}:{m:02}")
        } else {
            write!(f, "{h:02}:{m:02}:{s:02}")
        }
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = TimeOfDayParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Shortest distance between two times of day, going either way round the clock.
fn circular_distance(a: u32, b: u32) -> u32 {
    let d = a.abs_diff(b);
    d.min(SECS_PER_DAY - d)
}

/// Overlap test over half-open `[start, end)` second intervals.
fn intervals_overlap(a: &[(u32, u32)], b: &[(u32, u32)]) -> bool {
    a.iter()
        .any(|&(a0, a1)| b.iter().any(|&(b0, b1)| a0 < b1 && b0 < a1))
}

// ---------------------------------------------------------------------------
// TimeWindow (inclusive, may wrap midnight)
// ---------------------------------------------------------------------------

/// Expected scan window `{from, to}`, inclusive on both ends.
///
/// When `from > to` the window wraps midnight: `t >= from || t <= to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: TimeOfDay,
    pub to: TimeOfDay,
}

impl TimeWindow {
    pub fn new(from: TimeOfDay, to: TimeOfDay) -> Self {
        Self { from, to }
    }

    /// The whole day, `00:00 ..= 23:59:59`.
    pub fn all_day() -> Self {
        Self {
            from: TimeOfDay::MIDNIGHT,
            to: TimeOfDay(SECS_PER_DAY - 1),
        }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.from > self.to
    }

    pub fn contains(&self, t: TimeOfDay) -> bool {
        if self.wraps_midnight() {
            t >= self.from || t <= self.to
        } else {
            self.from <= t && t <= self.to
        }
    }

    /// Seconds between `t` and the nearest window edge; 0 when inside.
    pub fn seconds_outside(&self, t: TimeOfDay) -> u32 {
        if self.contains(t) {
            return 0;
        }
        circular_distance(t.0, self.from.0).min(circular_distance(t.0, self.to.0))
    }

    /// Half-open second intervals covered by the window.
    pub fn intervals(&self) -> Vec<(u32, u32)> {
        if self.wraps_midnight() {
            vec![(self.from.0, SECS_PER_DAY), (0, self.to.0 + 1)]
        } else {
            vec![(self.from.0, self.to.0 + 1)]
        }
    }
}

// ---------------------------------------------------------------------------
// ShiftDef (half-open, may wrap midnight)
// ---------------------------------------------------------------------------

/// One round slot of a route's daily schedule: `[start, end)` local time.
///
/// `start >= end` wraps midnight; a slot whose occurrence starts on day D and
/// wraps belongs to service date D.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftDef {
    pub index: u32,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl ShiftDef {
    pub fn new(index: u32, start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { index, start, end }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, t: TimeOfDay) -> bool {
        if self.wraps_midnight() {
            t >= self.start || t < self.end
        } else {
            self.start <= t && t < self.end
        }
    }

    /// Length of one occurrence in seconds.
    pub fn duration_secs(&self) -> u32 {
        if self.wraps_midnight() {
            SECS_PER_DAY - self.start.0 + self.end.0
        } else {
            self.end.0 - self.start.0
        }
    }

    pub fn intervals(&self) -> Vec<(u32, u32)> {
        if self.wraps_midnight() {
            let mut v = vec![(self.start.0, SECS_PER_DAY)];
            if self.end.0 > 0 {
                v.push((0, self.end.0));
            }
            v
        } else {
            vec![(self.start.0, self.end.0)]
        }
    }

    /// Whether any second of `window` falls inside this slot.
    pub fn overlaps(&self, window: &TimeWindow) -> bool {
        intervals_overlap(&self.intervals(), &window.intervals())
    }
}
