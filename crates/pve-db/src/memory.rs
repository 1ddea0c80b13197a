//! In-process store for tests and batch replay.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
#[cfg(feature = "testkit")]
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pve_schemas::{
    Classification, IngestResponse, RoundId, RoundRecord, ScanEvent, ScanOutcome,
    ScanPointVersion,
};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{PatrolStore, ScanCommit, StoredState, SweepCommit};

#[derive(Debug, Default)]
struct Inner {
    versions: BTreeMap<(String, u32), ScanPointVersion>,
    events: BTreeMap<Uuid, ScanEvent>,
    responses: BTreeMap<(String, String), IngestResponse>,
    outcomes: BTreeMap<Uuid, ScanOutcome>,
    /// (round, point) -> outcome id of its VALID.
    valid_index: BTreeMap<(RoundId, String), Uuid>,
    rounds: BTreeMap<RoundId, RoundRecord>,
    watermarks: BTreeMap<String, DateTime<Utc>>,
}

impl Inner {
    fn check_outcome(&self, o: &ScanOutcome) -> Result<(), StoreError> {
        if o.classification != Classification::Valid {
            return Ok(());
        }
        let Some(round_id) = &o.round_id else {
            return Ok(());
        };
        match self.valid_index.get(&(round_id.clone(), o.scan_point_id.clone())) {
            Some(existing) if *existing != o.outcome_id => Err(StoreError::Constraint(format!(
                "round {round_id} already has a VALID outcome for {}",
                o.scan_point_id
            ))),
            _ => Ok(()),
        }
    }

    fn insert_outcome(&mut self, o: &ScanOutcome) {
        if self.outcomes.contains_key(&o.outcome_id) {
            return;
        }
        if o.classification == Classification::Valid {
            if let Some(round_id) = &o.round_id {
                self.valid_index
                    .insert((round_id.clone(), o.scan_point_id.clone()), o.outcome_id);
            }
        }
        self.outcomes.insert(o.outcome_id, o.clone());
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    #[cfg(feature = "testkit")]
    failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `n` write calls fail with [`StoreError::Unavailable`].
    #[cfg(feature = "testkit")]
    pub fn fail_next_writes(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    #[cfg(feature = "testkit")]
    fn injected_fault(&self) -> Result<(), StoreError> {
        let took = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            Err(StoreError::Unavailable("injected fault".to_string()))
        } else {
            Ok(())
        }
    }

    #[cfg(not(feature = "testkit"))]
    fn injected_fault(&self) -> Result<(), StoreError> {
        Ok(())
    }

    pub fn outcome_count(&self) -> usize {
        self.lock().outcomes.len()
    }

    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }
}

#[async_trait]
impl PatrolStore for MemoryStore {
    async fn save_scan(&self, commit: &ScanCommit) -> Result<(), StoreError> {
        self.injected_fault()?;
        let mut inner = self.lock();
        if let Some(o) = &commit.outcome {
            inner.check_outcome(o)?;
        }

        inner
            .events
            .entry(commit.event.event_id)
            .or_insert_with(|| commit.event.clone());
        inner
            .responses
            .entry((
                commit.response.guard_id.clone(),
                commit.response.client_event_id.clone(),
            ))
            .or_insert_with(|| commit.response.clone());
        if let Some(o) = &commit.outcome {
            inner.insert_outcome(o);
        }
        if let Some(r) = &commit.round {
            inner.rounds.insert(r.round_id.clone(), r.clone());
        }
        Ok(())
    }

    async fn save_sweep(&self, commit: &SweepCommit) -> Result<(), StoreError> {
        self.injected_fault()?;
        let mut inner = self.lock();
        for r in &commit.rounds {
            inner.rounds.insert(r.round_id.clone(), r.clone());
        }
        for o in &commit.missed {
            inner.insert_outcome(o);
        }
        let wm = inner
            .watermarks
            .entry(commit.factory_id.clone())
            .or_insert(commit.watermark);
        if commit.watermark > *wm {
            *wm = commit.watermark;
        }
        Ok(())
    }

    async fn save_point_version(&self, version: &ScanPointVersion) -> Result<(), StoreError> {
        self.injected_fault()?;
        self.lock()
            .versions
            .entry((version.point.id.clone(), version.version))
            .or_insert_with(|| version.clone());
        Ok(())
    }

    async fn load_state(&self) -> Result<StoredState, StoreError> {
        let inner = self.lock();

        let mut versions: Vec<ScanPointVersion> = inner.versions.values().cloned().collect();
        versions.sort_by(|a, b| {
            a.effective_from
                .cmp(&b.effective_from)
                .then_with(|| a.point.id.cmp(&b.point.id))
                .then_with(|| a.version.cmp(&b.version))
        });
        let mut events: Vec<ScanEvent> = inner.events.values().cloned().collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.event_id.cmp(&b.event_id)));
        let mut outcomes: Vec<ScanOutcome> = inner.outcomes.values().cloned().collect();
        outcomes.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.outcome_id.cmp(&b.outcome_id))
        });

        Ok(StoredState {
            point_versions: versions,
            events,
            responses: inner.responses.values().cloned().collect(),
            outcomes,
            rounds: inner.rounds.values().cloned().collect(),
            watermarks: inner.watermarks.clone(),
        })
    }

    async fn outcomes_for_date(&self, date: NaiveDate) -> Result<Vec<ScanOutcome>, StoreError> {
        let mut out: Vec<ScanOutcome> = self
            .lock()
            .outcomes
            .values()
            .filter(|o| o.service_date == date)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.outcome_id.cmp(&b.outcome_id))
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pve_schemas::{Deviation, Disposition, RoundStatus, ScanSource};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
    }

    fn commit(client: &str, valid: bool) -> ScanCommit {
        let event = ScanEvent {
            event_id: ScanEvent::derive_event_id("G1", client),
            guard_id: "G1".into(),
            scan_point_id: "P1".into(),
            factory_id: "F1".into(),
            timestamp: at(4),
            coordinates: None,
            source: ScanSource::Online,
            client_event_id: client.into(),
            received_at: at(4),
        };
        let outcome = ScanOutcome {
            outcome_id: ScanOutcome::for_event_id(event.event_id),
            scan_event_id: Some(event.event_id),
            scan_point_id: "P1".into(),
            factory_id: "F1".into(),
            round_id: Some(RoundId::new("R1", date(), 1)),
            guard_id: Some("G1".into()),
            classification: if valid {
                Classification::Valid
            } else {
                Classification::Duplicate
            },
            deviation: Deviation::default(),
            occurred_at: at(4),
            service_date: date(),
        };
        ScanCommit {
            response: IngestResponse {
                event_id: event.event_id,
                guard_id: "G1".into(),
                client_event_id: client.into(),
                disposition: Disposition::Classified {
                    outcome: outcome.clone(),
                },
            },
            event,
            outcome: Some(outcome),
            round: None,
        }
    }

    #[tokio::test]
    async fn save_scan_is_idempotent() {
        let store = MemoryStore::new();
        let c = commit("c-1", true);
        store.save_scan(&c).await.unwrap();
        store.save_scan(&c).await.unwrap();
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.outcome_count(), 1);
        assert_eq!(store.outcomes_for_date(date()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_valid_for_round_point_is_a_constraint_error() {
        let store = MemoryStore::new();
        store.save_scan(&commit("c-1", true)).await.unwrap();
        let err = store.save_scan(&commit("c-2", true)).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(!err.is_retryable());
        // Non-VALID outcomes for the same round point are fine.
        store.save_scan(&commit("c-3", false)).await.unwrap();
        assert_eq!(store.event_count(), 2);
    }

    #[tokio::test]
    async fn watermark_never_moves_back() {
        let store = MemoryStore::new();
        let round = RoundRecord {
            round_id: RoundId::new("R1", date(), 1),
            factory_id: "F1".into(),
            starts_at: at(3),
            ends_at: at(4),
            closes_at: at(5),
            expected_points: vec![],
            valid_points: Default::default(),
            accountable_guard: None,
            status: RoundStatus::Closed,
        };
        for wm in [at(6), at(5)] {
            store
                .save_sweep(&SweepCommit {
                    factory_id: "F1".into(),
                    rounds: vec![round.clone()],
                    missed: vec![],
                    watermark: wm,
                })
                .await
                .unwrap();
        }
        let state = store.load_state().await.unwrap();
        assert_eq!(state.watermarks.get("F1"), Some(&at(6)));
        assert_eq!(state.rounds.len(), 1);
    }
}
