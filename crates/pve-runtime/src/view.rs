//! Read-side view the query facade projects from.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use pve_query::{DateRange, PatrolView};
use pve_reconcile::plan_round;
use pve_schemas::{PerformanceMetric, RoundRecord, ScanEvent, ScanOutcome, ScanPoint};
use uuid::Uuid;

use crate::service::PatrolService;

impl PatrolView for PatrolService {
    fn generation(&self) -> u64 {
        self.generation_now()
    }

    fn timezone(&self) -> Tz {
        self.schedule().tz()
    }

    fn outcomes(&self, range: DateRange) -> Vec<ScanOutcome> {
        let mut out: Vec<ScanOutcome> = self
            .all_outcomes()
            .into_iter()
            .filter(|o| range.contains(o.service_date))
            .collect();
        out.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.outcome_id.cmp(&b.outcome_id))
        });
        out
    }

    fn outcome(&self, outcome_id: Uuid) -> Option<ScanOutcome> {
        self.find_outcome(outcome_id)
    }

    fn event(&self, event_id: Uuid) -> Option<ScanEvent> {
        self.find_event(event_id)
    }

    fn rounds(&self, factory_id: Option<&str>, date: NaiveDate) -> Vec<RoundRecord> {
        let registry = self.registry();
        let schedule = self.schedule();
        let factories: Vec<String> = match factory_id {
            Some(f) => vec![f.to_string()],
            None => registry.factories().into_iter().collect(),
        };

        let mut out = Vec::new();
        for factory in &factories {
            for route in registry.routes(factory) {
                for shift in schedule.shifts_for(&route) {
                    let occ = schedule.occurrence(&route, *shift, date);
                    let round = self
                        .round(&occ.round_id())
                        .unwrap_or_else(|| plan_round(schedule, &registry, factory, &occ));
                    out.push(round);
                }
            }
        }
        out.sort_by(|a, b| a.round_id.cmp(&b.round_id));
        out
    }

    fn metrics(&self, guard_id: Option<&str>, range: DateRange) -> Vec<PerformanceMetric> {
        self.aggregator().query(guard_id, range.from, range.to)
    }

    fn known_guards(&self) -> BTreeSet<String> {
        self.aggregator().known_guards()
    }

    fn scan_point(&self, scan_point_id: &str, at: DateTime<Utc>) -> Option<ScanPoint> {
        self.registry().resolve_at(scan_point_id, at).cloned()
    }
}
