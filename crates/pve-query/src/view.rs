use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use pve_schemas::{PerformanceMetric, RoundRecord, ScanEvent, ScanOutcome, ScanPoint};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inclusive service-date range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self { from: date, to: date }
    }

    pub fn all() -> Self {
        Self {
            from: NaiveDate::MIN,
            to: NaiveDate::MAX,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

/// Snapshot access the projections read from.
///
/// `generation` must change whenever anything another method returns could
/// have changed.
pub trait PatrolView {
    fn generation(&self) -> u64;

    fn timezone(&self) -> Tz;

    /// Outcomes whose service date falls in `range`.
    fn outcomes(&self, range: DateRange) -> Vec<ScanOutcome>;

    fn outcome(&self, outcome_id: Uuid) -> Option<ScanOutcome>;

    fn event(&self, event_id: Uuid) -> Option<ScanEvent>;

    /// Every round scheduled on `date`: stored rounds as they are, the rest
    /// planned from the configuration in force at their start.
    fn rounds(&self, factory_id: Option<&str>, date: NaiveDate) -> Vec<RoundRecord>;

    fn metrics(&self, guard_id: Option<&str>, range: DateRange) -> Vec<PerformanceMetric>;

    fn known_guards(&self) -> BTreeSet<String>;

    fn scan_point(&self, scan_point_id: &str, at: DateTime<Utc>) -> Option<ScanPoint>;
}

#[cfg(test)]
pub(crate) mod tests_support {
    use std::sync::atomic::{AtomicU64, Ordering};

    use chrono::TimeZone;
    use pve_schemas::{
        Classification, Deviation, GeoPoint, RoundId, RoundStatus, ScanSource,
    };

    use super::*;

    /// In-memory view over a fixed two-round day at factory F1.
    pub(crate) struct FakeView {
        pub generation: AtomicU64,
        pub outcomes: Vec<ScanOutcome>,
        pub events: Vec<ScanEvent>,
        pub rounds: Vec<RoundRecord>,
        pub guards: BTreeSet<String>,
    }

    impl FakeView {
        pub fn date() -> NaiveDate {
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        }

        pub fn bump(&self) {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }

        fn make_outcome(n: u128, point: &str, guard: &str, c: Classification, min: u32) -> ScanOutcome {
            ScanOutcome {
                outcome_id: Uuid::from_u128(n),
                scan_event_id: Some(Uuid::from_u128(100 + n)),
                scan_point_id: point.into(),
                factory_id: "F1".into(),
                round_id: Some(RoundId::new("R1", Self::date(), 1)),
                guard_id: Some(guard.into()),
                classification: c,
                deviation: Deviation::default(),
                // 03:40 UTC is 09:10 in Asia/Kolkata.
                occurred_at: Utc.with_ymd_and_hms(2024, 3, 1, 3, 40, 0).unwrap()
                    + chrono::Duration::minutes(min as i64),
                service_date: Self::date(),
            }
        }

        fn make_round(shift: u32, status: RoundStatus) -> RoundRecord {
            let start = Utc.with_ymd_and_hms(2024, 3, 1, 3, 30, 0).unwrap()
                + chrono::Duration::minutes(30 * (shift as i64 - 1));
            RoundRecord {
                round_id: RoundId::new("R1", Self::date(), shift),
                factory_id: "F1".into(),
                starts_at: start,
                ends_at: start + chrono::Duration::minutes(30),
                closes_at: start + chrono::Duration::minutes(35),
                expected_points: vec!["P1".into(), "P2".into()],
                valid_points: Default::default(),
                accountable_guard: None,
                status,
            }
        }

        pub fn sample() -> Self {
            let valid = Self::make_outcome(1, "P1", "G1", Classification::Valid, 0);
            let mut missed = Self::make_outcome(2, "P2", "G1", Classification::Missed, 20);
            missed.scan_event_id = None;
            let too_soon = Self::make_outcome(3, "P1", "G2", Classification::TooSoon, 5);

            let mut closed = Self::make_round(1, RoundStatus::Closed);
            closed.valid_points.insert("P1".into(), valid.outcome_id);
            closed.accountable_guard = Some("G1".into());

            let event = ScanEvent {
                event_id: Uuid::from_u128(101),
                guard_id: "G1".into(),
                scan_point_id: "P1".into(),
                factory_id: "F1".into(),
                timestamp: valid.occurred_at,
                coordinates: Some(GeoPoint { lat: 12.5, lon: 77.25 }),
                source: ScanSource::Online,
                client_event_id: "c-1".into(),
                received_at: valid.occurred_at,
            };

            Self {
                generation: AtomicU64::new(0),
                outcomes: vec![valid, missed, too_soon],
                events: vec![event],
                rounds: vec![Self::make_round(2, RoundStatus::Open), closed],
                guards: ["G1", "G2", "G3"].into_iter().map(String::from).collect(),
            }
        }
    }

    impl FakeView {
        /// `sample()` plus a closed F2 round on route R2 with both points missed.
        pub fn two_factories() -> Self {
            let mut view = Self::sample();
            let mut round = Self::make_round(1, RoundStatus::Closed);
            round.round_id = RoundId::new("R2", Self::date(), 1);
            round.factory_id = "F2".into();
            round.expected_points = vec!["Q1".into(), "Q2".into()];
            round.accountable_guard = Some("G3".into());

            for (n, point) in [(10, "Q1"), (11, "Q2")] {
                let mut o = Self::make_outcome(n, point, "G3", Classification::Missed, 20);
                o.scan_event_id = None;
                o.factory_id = "F2".into();
                o.round_id = Some(round.round_id.clone());
                view.outcomes.push(o);
            }
            view.rounds.push(round);
            view
        }
    }

    impl PatrolView for FakeView {
        fn generation(&self) -> u64 {
            self.generation.load(Ordering::SeqCst)
        }

        fn timezone(&self) -> Tz {
            chrono_tz::Asia::Kolkata
        }

        fn outcomes(&self, range: DateRange) -> Vec<ScanOutcome> {
            self.outcomes
                .iter()
                .filter(|o| range.contains(o.service_date))
                .cloned()
                .collect()
        }

        fn outcome(&self, outcome_id: Uuid) -> Option<ScanOutcome> {
            self.outcomes.iter().find(|o| o.outcome_id == outcome_id).cloned()
        }

        fn event(&self, event_id: Uuid) -> Option<ScanEvent> {
            self.events.iter().find(|e| e.event_id == event_id).cloned()
        }

        fn rounds(&self, factory_id: Option<&str>, date: NaiveDate) -> Vec<RoundRecord> {
            self.rounds
                .iter()
                .filter(|r| r.service_date() == date)
                .filter(|r| factory_id.map_or(true, |f| r.factory_id == f))
                .cloned()
                .collect()
        }

        fn metrics(&self, _guard_id: Option<&str>, _range: DateRange) -> Vec<PerformanceMetric> {
            Vec::new()
        }

        fn known_guards(&self) -> BTreeSet<String> {
            self.guards.clone()
        }

        fn scan_point(&self, _scan_point_id: &str, _at: DateTime<Utc>) -> Option<ScanPoint> {
            None
        }
    }
}
