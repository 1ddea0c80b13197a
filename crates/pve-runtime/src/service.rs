//! Concurrent patrol service.
//!
//! # Locking
//!
//! - `config_gate`: ingestion and sweeps hold it shared; registry writes hold
//!   it exclusively, so the configuration never changes under an event.
//! - submission locks, one per `(guard_id, client_event_id)`: serialize
//!   retransmissions, whatever scan point they name. Taken first.
//! - key locks, one per `(guard_id, scan_point_id)`: serialize events of the
//!   same pair.
//! - round locks, one per round: taken after the key lock. The sweep takes
//!   only round locks, in plan order.
//!
//! Every mutation is persisted first and applied to memory second. A store
//! failure therefore leaves memory untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use pve_aggregate::Aggregator;
use pve_db::{PatrolStore, ScanCommit, StoredState, SweepCommit};
use pve_ingest::{Ingested, ResponseLookup};
use pve_query::{
    AnalyticsOverview, DashboardChartsResponse, DateRange, GuardPerformanceResponse, GuardScan,
    MissedScansResponse, PatrolReportResponse, ProcessResponse, QueryFacade,
};
use pve_reconcile::{
    check_config_change, close_round, decide, history_cutoff, place, plan_round, plan_sweep,
    Decision, KeyHistory, Schedule, SweepReport, SweepWatermark,
};
use pve_registry::ScanPointRegistry;
use pve_schemas::{
    Classification, Disposition, IngestResponse, RawScanEvent, RoundId, RoundRecord, ScanEvent,
    ScanOutcome, ScanPoint, ScanPointVersion,
};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::PatrolError;
use crate::events::RuntimeEvent;
use crate::retry::with_retry;
use crate::settings::RuntimeSettings;

type PairKey = (String, String);

/// Reply to one scan submission.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IngestResult {
    pub response: IngestResponse,
    /// True when this was a retransmission answered from the stored response.
    pub duplicate: bool,
}

impl IngestResult {
    /// The business rejection carried by the response, if any.
    pub fn rejection(&self, scan_point_id: &str) -> Option<PatrolError> {
        match &self.response.disposition {
            Disposition::Rejected { rejection } => {
                Some(PatrolError::from_rejection(rejection, scan_point_id))
            }
            Disposition::Classified { .. } => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub point_versions: usize,
    pub events: usize,
    pub outcomes: usize,
    pub rounds: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuntimeStatus {
    pub generation: u64,
    pub factories: usize,
    pub scan_points: usize,
    pub open_rounds: usize,
    pub closed_rounds: usize,
    pub events: usize,
    pub outcomes: usize,
    pub watermarks: BTreeMap<String, DateTime<Utc>>,
}

pub struct PatrolService {
    schedule: Schedule,
    settings: RuntimeSettings,
    store: Arc<dyn PatrolStore>,
    clock: Arc<dyn Clock>,

    registry: RwLock<ScanPointRegistry>,
    config_gate: tokio::sync::RwLock<()>,
    sweep_lock: Mutex<()>,
    submit_locks: DashMap<PairKey, Arc<Mutex<()>>>,
    key_locks: DashMap<PairKey, Arc<Mutex<()>>>,
    round_locks: DashMap<RoundId, Arc<Mutex<()>>>,

    histories: DashMap<PairKey, KeyHistory>,
    rounds: DashMap<RoundId, RoundRecord>,
    watermarks: DashMap<String, SweepWatermark>,
    responses: DashMap<PairKey, IngestResponse>,
    events: DashMap<Uuid, ScanEvent>,
    outcomes: DashMap<Uuid, ScanOutcome>,

    aggregator: Aggregator,
    queries: QueryFacade,
    generation: AtomicU64,
    bus: broadcast::Sender<RuntimeEvent>,
}

impl PatrolService {
    pub fn new(
        schedule: Schedule,
        settings: RuntimeSettings,
        store: Arc<dyn PatrolStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (bus, _rx) = broadcast::channel(1024);
        Self {
            schedule,
            settings,
            store,
            clock,
            registry: RwLock::new(ScanPointRegistry::new()),
            config_gate: tokio::sync::RwLock::new(()),
            sweep_lock: Mutex::new(()),
            submit_locks: DashMap::new(),
            key_locks: DashMap::new(),
            round_locks: DashMap::new(),
            histories: DashMap::new(),
            rounds: DashMap::new(),
            watermarks: DashMap::new(),
            responses: DashMap::new(),
            events: DashMap::new(),
            outcomes: DashMap::new(),
            aggregator: Aggregator::new(),
            queries: QueryFacade::new(),
            generation: AtomicU64::new(0),
            bus,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.bus.subscribe()
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub(crate) fn registry(&self) -> RwLockReadGuard<'_, ScanPointRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, ScanPointRegistry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn generation_now(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn publish_event(&self, event: RuntimeEvent) {
        // No subscribers is fine.
        let _ = self.bus.send(event);
    }

    fn submit_lock(&self, key: &PairKey) -> Arc<Mutex<()>> {
        self.submit_locks.entry(key.clone()).or_default().clone()
    }

    fn key_lock(&self, key: &PairKey) -> Arc<Mutex<()>> {
        self.key_locks.entry(key.clone()).or_default().clone()
    }

    fn round_lock(&self, id: &RoundId) -> Arc<Mutex<()>> {
        self.round_locks.entry(id.clone()).or_default().clone()
    }

    pub fn watermark(&self, factory_id: &str) -> Option<DateTime<Utc>> {
        self.watermarks.get(factory_id).and_then(|w| w.last())
    }

    pub fn round(&self, id: &RoundId) -> Option<RoundRecord> {
        self.rounds.get(id).map(|r| r.clone())
    }

    /// VALID timestamps held for cooldown checks, across every key.
    pub fn history_entries(&self) -> usize {
        self.histories.iter().map(|h| h.len()).sum()
    }

    pub(crate) fn all_outcomes(&self) -> Vec<ScanOutcome> {
        self.outcomes.iter().map(|o| o.value().clone()).collect()
    }

    pub(crate) fn find_outcome(&self, id: Uuid) -> Option<ScanOutcome> {
        self.outcomes.get(&id).map(|o| o.clone())
    }

    pub(crate) fn find_event(&self, id: Uuid) -> Option<ScanEvent> {
        self.events.get(&id).map(|e| e.clone())
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Rebuild every in-memory structure from the store. Call once, before
    /// serving traffic.
    pub async fn recover(&self) -> Result<RecoveryReport, PatrolError> {
        let state = self
            .store
            .load_state()
            .await
            .map_err(|source| PatrolError::StorageFailure {
                attempts: 1,
                source,
            })?;
        let report = self.restore(state);
        tracing::info!(
            point_versions = report.point_versions,
            events = report.events,
            outcomes = report.outcomes,
            rounds = report.rounds,
            "state recovered"
        );
        Ok(report)
    }

    fn restore(&self, state: StoredState) -> RecoveryReport {
        let report = RecoveryReport {
            point_versions: state.point_versions.len(),
            events: state.events.len(),
            outcomes: state.outcomes.len(),
            rounds: state.rounds.len(),
        };

        *self.registry_mut() = ScanPointRegistry::from_versions(state.point_versions);
        for r in state.rounds {
            self.rounds.insert(r.round_id.clone(), r);
        }
        for (factory_id, at) in state.watermarks {
            self.watermarks.insert(factory_id, SweepWatermark::at(at));
        }
        for resp in state.responses {
            self.responses
                .insert((resp.guard_id.clone(), resp.client_event_id.clone()), resp);
        }
        for e in state.events {
            self.events.insert(e.event_id, e);
        }
        for o in state.outcomes {
            if o.classification == Classification::Valid && o.scan_event_id.is_some() {
                if let Some(guard) = &o.guard_id {
                    self.histories
                        .entry((guard.clone(), o.scan_point_id.clone()))
                        .or_default()
                        .record_valid(o.occurred_at);
                }
            }
            self.aggregator.apply(&o);
            self.outcomes.insert(o.outcome_id, o);
        }
        self.bump();
        report
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Validate, deduplicate, classify and persist one scan submission.
    ///
    /// Business rejections come back as `Ok` with a rejected disposition so a
    /// retransmission gets the identical response.
    pub async fn ingest_scan(&self, raw: &RawScanEvent) -> Result<IngestResult, PatrolError> {
        let _config = self.config_gate.read().await;
        let now = self.clock.now();

        let ingested = {
            let registry = self.registry();
            pve_ingest::ingest(&registry, self, raw, now, self.settings.ingest)
        };
        let event = match ingested {
            Ok(Ingested::Accepted(event)) => event,
            Ok(Ingested::Duplicate(response)) => {
                tracing::debug!(
                    guard_id = %response.guard_id,
                    client_event_id = %response.client_event_id,
                    "duplicate scan submission"
                );
                return Ok(IngestResult {
                    response,
                    duplicate: true,
                });
            }
            Err(e) => {
                tracing::info!(
                    guard_id = %raw.guard_id,
                    scan_point_id = %raw.scan_point_id,
                    error = %e,
                    "scan submission refused"
                );
                return Err(e.into());
            }
        };

        let submit_key: PairKey = (event.guard_id.clone(), event.client_event_id.clone());
        let submit_lock = self.submit_lock(&submit_key);
        let _submit_guard = submit_lock.lock().await;

        // A concurrent retransmission may have committed while we waited.
        if let Some(response) = self.prior_response(&event.guard_id, &event.client_event_id) {
            self.submit_locks.remove(&submit_key);
            return Ok(IngestResult {
                response,
                duplicate: true,
            });
        }

        let key: PairKey = (event.guard_id.clone(), event.scan_point_id.clone());
        let key_lock = self.key_lock(&key);
        let _key_guard = key_lock.lock().await;

        let target = {
            let registry = self.registry();
            place(&self.schedule, &registry, &event)
                .ok()
                .and_then(|p| p.occurrence.map(|o| o.round_id()))
        };
        let round_lock = target.as_ref().map(|id| self.round_lock(id));
        let _round_guard = match &round_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let decision = {
            let registry = self.registry();
            match place(&self.schedule, &registry, &event) {
                Err(reason) => Decision::Rejected(reason),
                Ok(placement) => {
                    let existing = placement
                        .occurrence
                        .as_ref()
                        .and_then(|o| self.round(&o.round_id()));
                    let history = self
                        .histories
                        .get(&key)
                        .map(|h| h.clone())
                        .unwrap_or_default();
                    decide(
                        &self.schedule,
                        &registry,
                        &placement,
                        &event,
                        existing.as_ref(),
                        self.watermark(&placement.point.factory_id),
                        &history,
                    )
                }
            }
        };

        let (disposition, outcome, round) = match decision {
            Decision::Rejected(rejection) => (Disposition::Rejected { rejection }, None, None),
            Decision::Classified { outcome, round } => (
                Disposition::Classified {
                    outcome: outcome.clone(),
                },
                Some(outcome),
                round,
            ),
        };
        let commit = ScanCommit {
            response: IngestResponse {
                event_id: event.event_id,
                guard_id: event.guard_id.clone(),
                client_event_id: event.client_event_id.clone(),
                disposition,
            },
            event,
            outcome,
            round,
        };

        with_retry(&self.settings.storage_retry, "save_scan", || {
            self.store.save_scan(&commit)
        })
        .await?;

        let response = commit.response.clone();
        self.apply_scan(commit);
        // The response is visible now; later submissions dedupe without the lock.
        self.submit_locks.remove(&submit_key);
        Ok(IngestResult {
            response,
            duplicate: false,
        })
    }

    fn apply_scan(&self, commit: ScanCommit) {
        let ScanCommit {
            event,
            response,
            outcome,
            round,
        } = commit;

        match &outcome {
            Some(o) => tracing::info!(
                guard_id = %event.guard_id,
                scan_point_id = %event.scan_point_id,
                classification = %o.classification,
                round_id = ?o.round_id.as_ref().map(ToString::to_string),
                "scan classified"
            ),
            None => tracing::info!(
                guard_id = %event.guard_id,
                scan_point_id = %event.scan_point_id,
                "scan rejected"
            ),
        }

        if let Some(o) = &outcome {
            if o.is_valid() {
                self.histories
                    .entry((event.guard_id.clone(), event.scan_point_id.clone()))
                    .or_default()
                    .record_valid(event.timestamp);
            }
        }
        if let Some(r) = round {
            self.rounds.insert(r.round_id.clone(), r);
        }
        self.responses
            .entry((response.guard_id.clone(), response.client_event_id.clone()))
            .or_insert(response);
        self.events.insert(event.event_id, event);
        if let Some(o) = outcome {
            self.aggregator.apply(&o);
            self.outcomes.insert(o.outcome_id, o.clone());
            self.bump();
            self.publish_event(RuntimeEvent::Outcome { outcome: o });
        } else {
            self.bump();
        }
    }

    // -----------------------------------------------------------------------
    // Closing sweep
    // -----------------------------------------------------------------------

    /// Close every round whose shift end plus grace has passed, emitting one
    /// MISSED per unsatisfied expected point. Safe to call repeatedly.
    pub async fn close_expired_rounds(&self) -> Result<SweepReport, PatrolError> {
        let _sweep = self.sweep_lock.lock().await;
        let _config = self.config_gate.read().await;
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let factories = self.registry().factories();
        for factory_id in factories {
            let wm = self
                .watermarks
                .get(&factory_id)
                .map(|w| w.clone())
                .unwrap_or_default();
            if !wm.check(now).is_fresh() {
                tracing::warn!(%factory_id, "sweep clock behind watermark, skipping");
                report.stale_factories.push(factory_id);
                continue;
            }

            let plan = {
                let registry = self.registry();
                let Some(after) = wm
                    .last()
                    .or_else(|| registry.first_effective_from(&factory_id))
                else {
                    continue;
                };
                plan_sweep(
                    &self.schedule,
                    &registry.routes(&factory_id),
                    after,
                    now,
                    self.settings.max_rounds_per_run,
                )
            };

            let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(plan.occurrences.len());
            for occ in &plan.occurrences {
                guards.push(self.round_lock(&occ.round_id()).lock_owned().await);
            }

            let mut closed = Vec::new();
            let mut missed = Vec::new();
            {
                let registry = self.registry();
                for occ in &plan.occurrences {
                    let mut round = self
                        .round(&occ.round_id())
                        .unwrap_or_else(|| plan_round(&self.schedule, &registry, &factory_id, occ));
                    if round.is_closed() {
                        continue;
                    }
                    missed.extend(close_round(&mut round));
                    closed.push(round);
                }
            }

            let commit = SweepCommit {
                factory_id: factory_id.clone(),
                rounds: closed,
                missed,
                watermark: plan.advance_to,
            };
            with_retry(&self.settings.storage_retry, "save_sweep", || {
                self.store.save_sweep(&commit)
            })
            .await?;

            let round_ids: Vec<RoundId> = commit.rounds.iter().map(|r| r.round_id.clone()).collect();
            report.missed.extend(commit.missed.iter().cloned());
            report.pruned_history += self.apply_sweep(commit);
            drop(guards);
            for id in &round_ids {
                self.round_locks.remove(id);
            }

            if plan.truncated {
                tracing::info!(%factory_id, "sweep hit its per-run bound, more rounds pending");
                report.truncated_factories.push(factory_id);
            }
            report.closed_rounds.extend(round_ids);
        }

        if !report.is_noop() {
            tracing::info!(
                closed = report.closed_rounds.len(),
                missed = report.missed.len(),
                pruned_history = report.pruned_history,
                "closing sweep finished"
            );
        }
        Ok(report)
    }

    /// Returns how many VALID history entries were pruned.
    fn apply_sweep(&self, commit: SweepCommit) -> usize {
        let SweepCommit {
            factory_id,
            rounds,
            missed,
            watermark,
        } = commit;

        let round_ids: Vec<RoundId> = rounds.iter().map(|r| r.round_id.clone()).collect();
        for r in rounds {
            self.rounds.insert(r.round_id.clone(), r);
        }
        let missed_count = missed.len();
        for o in missed {
            self.aggregator.apply(&o);
            self.outcomes.insert(o.outcome_id, o);
        }
        let advanced = {
            let mut wm = self.watermarks.entry(factory_id.clone()).or_default();
            wm.advance(watermark);
            wm.last()
        };
        let pruned = advanced.map_or(0, |at| self.prune_histories(&factory_id, at));
        self.bump();

        if !round_ids.is_empty() {
            self.publish_event(RuntimeEvent::RoundsClosed {
                factory_id,
                round_ids,
                missed: missed_count,
            });
        }
        pruned
    }

    fn prune_histories(&self, factory_id: &str, watermark: DateTime<Utc>) -> usize {
        let registry = self.registry();
        let mut removed = 0;
        self.histories.retain(|(_, point_id), history| {
            if registry.get_point(point_id).map(|p| p.factory_id.as_str()) == Some(factory_id) {
                let cutoff = history_cutoff(&self.schedule, &registry, point_id, watermark);
                removed += history.prune_before(cutoff);
            }
            !history.is_empty()
        });
        removed
    }

    // -----------------------------------------------------------------------
    // Scan point administration
    // -----------------------------------------------------------------------

    /// Append a configuration version. `effective_from` defaults to now.
    pub async fn upsert_scan_point(
        &self,
        point: ScanPoint,
        effective_from: Option<DateTime<Utc>>,
    ) -> Result<ScanPointVersion, PatrolError> {
        let _config = self.config_gate.write().await;
        let effective_from = effective_from.unwrap_or_else(|| self.clock.now());
        check_config_change(self.watermark(&point.factory_id), effective_from)?;
        let version = self.registry().prepare_upsert(point, effective_from)?;
        self.commit_version(version).await
    }

    pub async fn deactivate_scan_point(
        &self,
        id: &str,
        effective_from: Option<DateTime<Utc>>,
    ) -> Result<ScanPointVersion, PatrolError> {
        let _config = self.config_gate.write().await;
        let effective_from = effective_from.unwrap_or_else(|| self.clock.now());
        let version = {
            let registry = self.registry();
            let current = registry
                .get_point(id)
                .ok_or_else(|| PatrolError::UnknownScanPoint { id: id.to_string() })?;
            check_config_change(self.watermark(&current.factory_id), effective_from)?;
            registry.prepare_deactivate(id, effective_from)?
        };
        self.commit_version(version).await
    }

    async fn commit_version(&self, version: ScanPointVersion) -> Result<ScanPointVersion, PatrolError> {
        with_retry(&self.settings.storage_retry, "save_point_version", || {
            self.store.save_point_version(&version)
        })
        .await?;
        self.registry_mut().apply_version(version.clone());
        self.bump();
        tracing::info!(
            scan_point_id = %version.point.id,
            version = version.version,
            status = ?version.point.status,
            effective_from = %version.effective_from,
            "scan point version stored"
        );
        Ok(version)
    }

    /// Latest version of every point, optionally for one factory.
    pub fn list_scan_points(&self, factory_id: Option<&str>) -> Vec<ScanPoint> {
        let registry = self.registry();
        let factories: Vec<String> = match factory_id {
            Some(f) => vec![f.to_string()],
            None => registry.factories().into_iter().collect(),
        };
        factories
            .iter()
            .flat_map(|f| registry.get(f).into_iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Reprocessing
    // -----------------------------------------------------------------------

    /// Rebuild one date's performance rows from stored outcomes.
    pub async fn reprocess(&self, date: NaiveDate) -> Result<ProcessResponse, PatrolError> {
        let outcomes = self
            .store
            .outcomes_for_date(date)
            .await
            .map_err(|source| PatrolError::StorageFailure {
                attempts: 1,
                source,
            })?;
        let applied = self.aggregator.rebuild(date, &outcomes);
        self.bump();
        tracing::info!(%date, outcomes = outcomes.len(), applied, "performance rows rebuilt");
        Ok(ProcessResponse {
            success: true,
            message: format!("reprocessed {} outcome(s) for {date}", outcomes.len()),
            processed_count: Some(outcomes.len() as u64),
        })
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    pub fn status(&self) -> RuntimeStatus {
        let registry = self.registry();
        let closed = self.rounds.iter().filter(|r| r.is_closed()).count();
        RuntimeStatus {
            generation: self.generation_now(),
            factories: registry.factories().len(),
            scan_points: registry.factories().iter().map(|f| registry.get(f).len()).sum(),
            open_rounds: self.rounds.len() - closed,
            closed_rounds: closed,
            events: self.events.len(),
            outcomes: self.outcomes.len(),
            watermarks: self
                .watermarks
                .iter()
                .filter_map(|w| w.last().map(|at| (w.key().clone(), at)))
                .collect(),
        }
    }

    pub fn known_guards(&self) -> BTreeSet<String> {
        self.aggregator.known_guards()
    }

    pub fn overview(&self, date: NaiveDate) -> AnalyticsOverview {
        self.queries.overview(self, date)
    }

    pub fn scans_by_guard(&self, range: Option<DateRange>) -> Vec<GuardScan> {
        self.queries.scans_by_guard(self, range)
    }

    pub fn missed_scans(&self, factory_id: &str, date: NaiveDate) -> MissedScansResponse {
        self.queries.missed_scans(self, factory_id, date)
    }

    pub fn guard_performance(&self, date: NaiveDate) -> GuardPerformanceResponse {
        self.queries.guard_performance(self, date)
    }

    pub fn dashboard_charts(
        &self,
        factory_id: Option<&str>,
        date: NaiveDate,
    ) -> DashboardChartsResponse {
        self.queries.dashboard_charts(self, factory_id, date)
    }

    pub fn patrol_report(&self, factory_id: &str, date: NaiveDate) -> PatrolReportResponse {
        self.queries.patrol_report(self, factory_id, date)
    }
}

impl ResponseLookup for PatrolService {
    fn prior_response(&self, guard_id: &str, client_event_id: &str) -> Option<IngestResponse> {
        self.responses
            .get(&(guard_id.to_string(), client_event_id.to_string()))
            .map(|r| r.clone())
    }
}
