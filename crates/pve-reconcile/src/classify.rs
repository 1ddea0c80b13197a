//! Per-event classification.
//!
//! Checks run in a fixed order and the first failing one decides:
//! radius -> window -> cooldown -> duplicate. An event outside every shift
//! (no round) is OUT_OF_WINDOW unless the radius check already failed.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use pve_registry::ScanPointRegistry;
use pve_schemas::{Classification, Deviation, RoundRecord, ScanEvent, ScanPoint, TimeOfDay};

use crate::schedule::Schedule;

/// VALID timestamps already recorded for one `(guard, scan point)` pair.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyHistory {
    valid_at: BTreeSet<DateTime<Utc>>,
}

impl KeyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_valid(&mut self, at: DateTime<Utc>) {
        self.valid_at.insert(at);
    }

    pub fn len(&self) -> usize {
        self.valid_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid_at.is_empty()
    }

    /// Drop VALIDs strictly before `cutoff`; returns how many went.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let kept = self.valid_at.split_off(&cutoff);
        let removed = self.valid_at.len();
        self.valid_at = kept;
        removed
    }

    /// True when a VALID lies strictly closer than `gap` to `at`, either side.
    pub fn within(&self, at: DateTime<Utc>, gap: Duration) -> bool {
        if gap <= Duration::zero() {
            return false;
        }
        let before = self.valid_at.range(..=at).next_back();
        let after = self.valid_at.range(at..).next();
        before.is_some_and(|t| at - *t < gap) || after.is_some_and(|t| *t - at < gap)
    }
}

fn gap_duration(secs: u64) -> Duration {
    Duration::seconds(secs.min(i64::MAX as u64 / 1000) as i64)
}

/// Oldest VALID that can still make a scan of `scan_point_id` TOO_SOON once
/// the factory's watermark is at `watermark`.
///
/// Cooldown is only checked for events inside an open round, and every open
/// round closes after the watermark, so such an event is no earlier than
/// `watermark - (one day + grace)`. Anything a full gap before that is inert.
/// The gap is the largest across every version of the point.
pub fn history_cutoff(
    schedule: &Schedule,
    registry: &ScanPointRegistry,
    scan_point_id: &str,
    watermark: DateTime<Utc>,
) -> DateTime<Utc> {
    let gap = registry
        .versions(scan_point_id)
        .iter()
        .map(|v| v.point.effective_gap_secs())
        .max()
        .unwrap_or(0);
    watermark
        .checked_sub_signed(Duration::days(1) + schedule.grace())
        .and_then(|t| t.checked_sub_signed(gap_duration(gap)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Everything one classification needs, borrowed from the caller's state.
pub struct ClassifyInput<'a> {
    pub point: &'a ScanPoint,
    pub event: &'a ScanEvent,
    /// Event time of day in the facility time zone.
    pub local_time: TimeOfDay,
    /// Enclosing round, if the event falls inside a shift.
    pub round: Option<&'a RoundRecord>,
    pub history: &'a KeyHistory,
}

pub fn classify(input: &ClassifyInput<'_>) -> (Classification, Deviation) {
    let point = input.point;
    let event = input.event;

    let meters = match (point.coordinates(), event.coordinates) {
        (Some(p), Some(e)) => Some(p.distance_meters(&e)),
        _ => None,
    };
    let window = point.patrol_logic.expected_window;
    let outside = window.seconds_outside(input.local_time);
    let deviation = Deviation {
        seconds_outside_window: (outside > 0).then_some(i64::from(outside)),
        meters_from_point: meters,
    };

    // 1. radius
    if point.validation.gps_required {
        let radius_ok = match meters {
            Some(m) => m <= point.validation.allowed_radius_meters,
            None if event.coordinates.is_none() => point.validation.offline_allowed,
            // Point without coordinates cannot be gps_required (registry rule).
            None => false,
        };
        if !radius_ok {
            return (Classification::OutOfRadius, deviation);
        }
    }

    // 2. window (no enclosing shift counts as outside)
    let Some(round) = input.round else {
        return (Classification::OutOfWindow, deviation);
    };
    if !window.contains(input.local_time) {
        return (Classification::OutOfWindow, deviation);
    }

    // 3. cooldown
    let gap = gap_duration(point.effective_gap_secs());
    if input.history.within(event.timestamp, gap) {
        return (Classification::TooSoon, deviation);
    }

    // 4. one VALID per (scan point, round), any guard
    if round.has_valid(&point.id) {
        return (Classification::Duplicate, deviation);
    }

    (Classification::Valid, deviation)
}
