use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pve_schemas::{IngestResponse, RoundRecord, ScanEvent, ScanOutcome, ScanPointVersion};

use crate::error::StoreError;

/// Everything one accepted scan event writes, committed as a unit.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanCommit {
    pub event: ScanEvent,
    pub response: IngestResponse,
    /// Absent for rejected events.
    pub outcome: Option<ScanOutcome>,
    /// New state of the enclosing round, when the event landed in one.
    pub round: Option<RoundRecord>,
}

/// One factory's sweep result, committed as a unit.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepCommit {
    pub factory_id: String,
    pub rounds: Vec<RoundRecord>,
    pub missed: Vec<ScanOutcome>,
    pub watermark: DateTime<Utc>,
}

/// Full persisted state, loaded once at startup for recovery.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoredState {
    pub point_versions: Vec<ScanPointVersion>,
    pub events: Vec<ScanEvent>,
    pub responses: Vec<IngestResponse>,
    pub outcomes: Vec<ScanOutcome>,
    pub rounds: Vec<RoundRecord>,
    pub watermarks: BTreeMap<String, DateTime<Utc>>,
}

/// Durable storage behind the service runtime.
///
/// Every write is idempotent: rows keyed by deterministic ids are inserted at
/// most once, round rows and watermarks are upserted (watermarks never move
/// backwards). Each call is atomic.
#[async_trait]
pub trait PatrolStore: Send + Sync {
    async fn save_scan(&self, commit: &ScanCommit) -> Result<(), StoreError>;

    async fn save_sweep(&self, commit: &SweepCommit) -> Result<(), StoreError>;

    async fn save_point_version(&self, version: &ScanPointVersion) -> Result<(), StoreError>;

    async fn load_state(&self) -> Result<StoredState, StoreError>;

    async fn outcomes_for_date(&self, date: NaiveDate) -> Result<Vec<ScanOutcome>, StoreError>;
}
