//! pve-aggregate
//!
//! Aggregator: per-(guard, date) performance rows derived solely from
//! [`ScanOutcome`]s.
//!
//! Counting rules:
//! - VALID: total + 1, scanned + 1
//! - MISSED: total + 1, missed + 1
//! - OUT_OF_WINDOW / OUT_OF_RADIUS / TOO_SOON: total + 1
//! - DUPLICATE: neither numerator nor denominator
//!
//! Every row remembers which outcome ids it has absorbed, so re-applying an
//! outcome is a no-op. Rows live in a sharded map and distinct keys update
//! in parallel.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use dashmap::DashMap;
use pve_schemas::{Classification, PerformanceMetric, ScanOutcome};
use uuid::Uuid;

type Key = (String, NaiveDate);

#[derive(Debug)]
struct Row {
    metric: PerformanceMetric,
    applied: HashSet<Uuid>,
}

#[derive(Debug, Default)]
pub struct Aggregator {
    rows: DashMap<Key, Row>,
    generation: AtomicU64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped on every effective mutation. Query caches key on it.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Fold one outcome into its `(guard, service_date)` row.
    ///
    /// Returns `false` when the outcome carries no guard or was already
    /// applied.
    pub fn apply(&self, outcome: &ScanOutcome) -> bool {
        let Some(guard) = outcome.guard_id.as_deref() else {
            return false;
        };
        let applied = {
            let mut row = self
                .rows
                .entry((guard.to_string(), outcome.service_date))
                .or_insert_with(|| Row {
                    metric: PerformanceMetric::empty(guard, outcome.service_date),
                    applied: HashSet::new(),
                });
            if !row.applied.insert(outcome.outcome_id) {
                false
            } else {
                count(&mut row.metric, outcome.classification);
                true
            }
        };
        if applied {
            self.bump();
        }
        applied
    }

    pub fn get(&self, guard_id: &str, date: NaiveDate) -> Option<PerformanceMetric> {
        self.rows
            .get(&(guard_id.to_string(), date))
            .map(|r| r.metric.clone())
    }

    /// Rows with `from <= date <= to`, optionally for one guard, sorted by
    /// `(date, guard)`.
    pub fn query(
        &self,
        guard_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Vec<PerformanceMetric> {
        let mut out: Vec<PerformanceMetric> = self
            .rows
            .iter()
            .filter(|e| {
                let (g, d) = e.key();
                *d >= from && *d <= to && guard_id.map_or(true, |want| want == g)
            })
            .map(|e| e.value().metric.clone())
            .collect();
        out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.guard_id.cmp(&b.guard_id)));
        out
    }

    /// Every guard with a row on `date`.
    pub fn guards_on(&self, date: NaiveDate) -> BTreeSet<String> {
        self.rows
            .iter()
            .filter(|e| e.key().1 == date)
            .map(|e| e.key().0.clone())
            .collect()
    }

    /// Every guard with any row.
    pub fn known_guards(&self) -> BTreeSet<String> {
        self.rows.iter().map(|e| e.key().0.clone()).collect()
    }

    /// Drop every row for `date` and rebuild it from `outcomes`. Outcomes for
    /// other dates are ignored. Returns how many outcomes were applied.
    pub fn rebuild(&self, date: NaiveDate, outcomes: &[ScanOutcome]) -> usize {
        self.rows.retain(|k, _| k.1 != date);
        self.bump();
        outcomes
            .iter()
            .filter(|o| o.service_date == date)
            .filter(|o| self.apply(o))
            .count()
    }
}

fn count(m: &mut PerformanceMetric, c: Classification) {
    match c {
        Classification::Valid => {
            m.total_points += 1;
            m.scanned_points += 1;
        }
        Classification::Missed => {
            m.total_points += 1;
            m.missed_points += 1;
        }
        Classification::OutOfWindow | Classification::OutOfRadius | Classification::TooSoon => {
            m.total_points += 1;
        }
        Classification::Duplicate => {}
    }
    m.refresh_score();
}
