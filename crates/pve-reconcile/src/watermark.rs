//! Sweep watermark: per-factory instant up to which round closing has run.
//!
//! # Invariants
//!
//! - **Monotonic**: the watermark never moves backwards.
//! - **Stale sweep is a no-op**: a `now` older than the watermark plans no
//!   work and leaves the watermark untouched.
//! - **Bounded**: one plan covers at most `max_rounds` occurrences; when it
//!   is cut short the watermark stops at the last planned `closes_at`, so the
//!   next run resumes where this one stopped.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::schedule::{Schedule, ShiftOccurrence};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepFreshness {
    Fresh,
    Stale {
        watermark: DateTime<Utc>,
        got: DateTime<Utc>,
    },
}

impl SweepFreshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, SweepFreshness::Fresh)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepWatermark {
    last: Option<DateTime<Utc>>,
}

impl SweepWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(last: DateTime<Utc>) -> Self {
        Self { last: Some(last) }
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.last
    }

    /// Read-only freshness check.
    pub fn check(&self, now: DateTime<Utc>) -> SweepFreshness {
        match self.last {
            Some(wm) if now < wm => SweepFreshness::Stale { watermark: wm, got: now },
            _ => SweepFreshness::Fresh,
        }
    }

    /// Move forward to `to`; earlier values are ignored. Returns whether it moved.
    pub fn advance(&mut self, to: DateTime<Utc>) -> bool {
        if self.last.is_some_and(|wm| to <= wm) {
            return false;
        }
        self.last = Some(to);
        true
    }
}

/// Work for one factory in one sweep run.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepPlan {
    /// Ordered by `(closes_at, route, shift index)`.
    pub occurrences: Vec<ShiftOccurrence>,
    /// Where the watermark goes once every planned round is closed.
    pub advance_to: DateTime<Utc>,
    pub truncated: bool,
}

/// Occurrences of `routes` with `after < closes_at <= now`, capped at
/// `max_rounds`. Occurrences sharing a `closes_at` are never split across
/// runs unless a single instant alone exceeds the cap.
pub fn plan_sweep(
    schedule: &Schedule,
    routes: &BTreeSet<String>,
    after: DateTime<Utc>,
    now: DateTime<Utc>,
    max_rounds: usize,
) -> SweepPlan {
    let mut occ: Vec<ShiftOccurrence> = routes
        .iter()
        .flat_map(|r| schedule.occurrences_closing_between(r, after, now))
        .collect();
    occ.sort_by(|a, b| {
        a.closes_at
            .cmp(&b.closes_at)
            .then_with(|| a.route_id.cmp(&b.route_id))
            .then_with(|| a.shift.index.cmp(&b.shift.index))
    });

    let max_rounds = max_rounds.max(1);
    if occ.len() <= max_rounds {
        return SweepPlan {
            occurrences: occ,
            advance_to: now,
            truncated: false,
        };
    }

    let mut cut = max_rounds;
    let boundary = occ[cut - 1].closes_at;
    if occ[cut].closes_at == boundary {
        // Back off to the previous instant, or take the whole group if it
        // alone overflows the cap.
        match occ[..cut].iter().rposition(|o| o.closes_at < boundary) {
            Some(i) => cut = i + 1,
            None => cut = occ.iter().take_while(|o| o.closes_at == boundary).count(),
        }
    }
    occ.truncate(cut);
    let advance_to = occ.last().map_or(after, |o| o.closes_at);
    SweepPlan {
        occurrences: occ,
        advance_to,
        truncated: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pve_config::default_shift_table;

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
    }

    fn routes(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn watermark_is_monotonic() {
        let mut wm = SweepWatermark::new();
        assert!(wm.check(utc(1, 0, 0)).is_fresh());
        assert!(wm.advance(utc(2, 0, 0)));
        assert!(!wm.advance(utc(1, 0, 0)));
        assert!(!wm.advance(utc(2, 0, 0)));
        assert_eq!(wm.last(), Some(utc(2, 0, 0)));
        assert_eq!(
            wm.check(utc(1, 12, 0)),
            SweepFreshness::Stale {
                watermark: utc(2, 0, 0),
                got: utc(1, 12, 0)
            }
        );
        assert!(wm.check(utc(2, 0, 0)).is_fresh());
    }

    #[test]
    fn untruncated_plan_advances_to_now() {
        let s = Schedule::new(chrono_tz::Asia::Kolkata, 300, default_shift_table());
        let plan = plan_sweep(&s, &routes(&["A", "B"]), utc(1, 3, 0), utc(2, 3, 0), 500);
        assert_eq!(plan.occurrences.len(), 70);
        assert!(!plan.truncated);
        assert_eq!(plan.advance_to, utc(2, 3, 0));
    }

    #[test]
    fn truncation_never_splits_an_instant() {
        let s = Schedule::new(chrono_tz::Asia::Kolkata, 300, default_shift_table());
        // Two routes close in lock-step, so each instant carries two rounds.
        let plan = plan_sweep(&s, &routes(&["A", "B"]), utc(1, 3, 0), utc(2, 3, 0), 5);
        assert!(plan.truncated);
        assert_eq!(plan.occurrences.len(), 4);
        assert_eq!(plan.advance_to, plan.occurrences[3].closes_at);

        // Cap of one still makes progress by taking the whole first instant.
        let plan = plan_sweep(&s, &routes(&["A", "B"]), utc(1, 3, 0), utc(2, 3, 0), 1);
        assert_eq!(plan.occurrences.len(), 2);
        assert!(plan.advance_to > utc(1, 3, 0));
    }
}
