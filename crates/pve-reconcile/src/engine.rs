//! Single-threaded reconciliation state machine.
//!
//! Owns the registry, every round and the per-key VALID histories. Used for
//! batch replay and as the reference the concurrent runtime is tested
//! against: feeding the same time-ordered events yields the same outcomes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pve_registry::{RegistryError, ScanPointRegistry};
use pve_schemas::{
    Classification, RejectionReason, RoundId, RoundRecord, ScanEvent, ScanOutcome, ScanPoint,
    ScanPointVersion,
};

use crate::classify::{history_cutoff, KeyHistory};
use crate::decide::{decide, place, Decision};
use crate::rounds::{close_round, plan_round};
use crate::schedule::Schedule;
use crate::watermark::{plan_sweep, SweepWatermark};

/// Summary of one `close_expired_rounds` run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepReport {
    pub closed_rounds: Vec<RoundId>,
    pub missed: Vec<ScanOutcome>,
    /// Factories whose watermark was ahead of `now`.
    pub stale_factories: Vec<String>,
    /// Factories that hit the per-run cap and still have work queued.
    pub truncated_factories: Vec<String>,
    /// VALID history entries dropped as too old to cause a TOO_SOON.
    pub pruned_history: usize,
}

impl SweepReport {
    pub fn is_noop(&self) -> bool {
        self.closed_rounds.is_empty()
    }
}

/// Reject config versions that would reach back into closed rounds.
pub fn check_config_change(
    watermark: Option<DateTime<Utc>>,
    effective_from: DateTime<Utc>,
) -> Result<(), RegistryError> {
    match watermark {
        Some(wm) if effective_from < wm => Err(RegistryError::ClosedPeriod {
            watermark: wm,
            got: effective_from,
        }),
        _ => Ok(()),
    }
}

#[derive(Clone, Debug)]
pub struct Reconciler {
    schedule: Schedule,
    registry: ScanPointRegistry,
    rounds: BTreeMap<RoundId, RoundRecord>,
    histories: BTreeMap<(String, String), KeyHistory>,
    watermarks: BTreeMap<String, SweepWatermark>,
}

impl Reconciler {
    pub fn new(schedule: Schedule, registry: ScanPointRegistry) -> Self {
        Self {
            schedule,
            registry,
            rounds: BTreeMap::new(),
            histories: BTreeMap::new(),
            watermarks: BTreeMap::new(),
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn registry(&self) -> &ScanPointRegistry {
        &self.registry
    }

    pub fn rounds(&self) -> impl Iterator<Item = &RoundRecord> {
        self.rounds.values()
    }

    pub fn round(&self, id: &RoundId) -> Option<&RoundRecord> {
        self.rounds.get(id)
    }

    pub fn watermark(&self, factory_id: &str) -> Option<DateTime<Utc>> {
        self.watermarks.get(factory_id).and_then(SweepWatermark::last)
    }

    pub fn upsert_point(
        &mut self,
        point: ScanPoint,
        effective_from: DateTime<Utc>,
    ) -> Result<ScanPointVersion, RegistryError> {
        check_config_change(self.watermark(&point.factory_id), effective_from)?;
        self.registry.upsert(point, effective_from)
    }

    pub fn deactivate_point(
        &mut self,
        id: &str,
        effective_from: DateTime<Utc>,
    ) -> Result<ScanPointVersion, RegistryError> {
        if let Some(p) = self.registry.get_point(id) {
            check_config_change(self.watermark(&p.factory_id), effective_from)?;
        }
        self.registry.deactivate(id, effective_from)
    }

    /// Classify one normalized event and apply its effects.
    pub fn process(&mut self, event: &ScanEvent) -> Result<ScanOutcome, RejectionReason> {
        let placement = place(&self.schedule, &self.registry, event)?;
        let factory_id = placement.point.factory_id.clone();
        let existing = placement
            .occurrence
            .as_ref()
            .and_then(|o| self.rounds.get(&o.round_id()));
        let key = (event.guard_id.clone(), event.scan_point_id.clone());
        let empty = KeyHistory::new();
        let history = self.histories.get(&key).unwrap_or(&empty);

        let decision = decide(
            &self.schedule,
            &self.registry,
            &placement,
            event,
            existing,
            self.watermark(&factory_id),
            history,
        );

        match decision {
            Decision::Rejected(reason) => Err(reason),
            Decision::Classified { outcome, round } => {
                if outcome.classification == Classification::Valid {
                    self.histories
                        .entry(key)
                        .or_default()
                        .record_valid(event.timestamp);
                }
                if let Some(r) = round {
                    self.rounds.insert(r.round_id.clone(), r);
                }
                Ok(outcome)
            }
        }
    }

    /// Close every round whose shift end plus grace is at or before `now`
    /// and after the factory's watermark. Factories run one at a time, each
    /// bounded by `max_rounds_per_factory`.
    pub fn close_expired_rounds(
        &mut self,
        now: DateTime<Utc>,
        max_rounds_per_factory: usize,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        for factory_id in self.registry.factories() {
            let wm = self.watermarks.entry(factory_id.clone()).or_default();
            if !wm.check(now).is_fresh() {
                report.stale_factories.push(factory_id);
                continue;
            }
            let Some(after) = wm
                .last()
                .or_else(|| self.registry.first_effective_from(&factory_id))
            else {
                continue;
            };

            let routes = self.registry.routes(&factory_id);
            let plan = plan_sweep(&self.schedule, &routes, after, now, max_rounds_per_factory);

            for occ in &plan.occurrences {
                let id = occ.round_id();
                let round = self.rounds.entry(id.clone()).or_insert_with(|| {
                    plan_round(&self.schedule, &self.registry, &factory_id, occ)
                });
                if round.is_closed() {
                    continue;
                }
                report.missed.extend(close_round(round));
                report.closed_rounds.push(id);
            }

            if plan.truncated {
                report.truncated_factories.push(factory_id.clone());
            }
            let wm = self.watermarks.entry(factory_id.clone()).or_default();
            wm.advance(plan.advance_to);
            if let Some(at) = wm.last() {
                report.pruned_history += self.prune_histories(&factory_id, at);
            }
        }

        report
    }

    pub fn history(&self, guard_id: &str, scan_point_id: &str) -> Option<&KeyHistory> {
        self.histories
            .get(&(guard_id.to_string(), scan_point_id.to_string()))
    }

    fn prune_histories(&mut self, factory_id: &str, watermark: DateTime<Utc>) -> usize {
        let (schedule, registry) = (&self.schedule, &self.registry);
        let mut removed = 0;
        self.histories.retain(|(_, point_id), history| {
            if registry.get_point(point_id).map(|p| p.factory_id.as_str()) == Some(factory_id) {
                let cutoff = history_cutoff(schedule, registry, point_id, watermark);
                removed += history.prune_before(cutoff);
            }
            !history.is_empty()
        });
        removed
    }
}
