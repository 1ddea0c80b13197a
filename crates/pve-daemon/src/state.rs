//! Shared state for pve-daemon.
//!
//! Handlers receive `State<Arc<AppState>>`. Engine state lives in the
//! [`PatrolService`]; this module only adds the daemon's own bus and build
//! metadata.

use std::sync::Arc;
use std::time::Duration;

use pve_runtime::{PatrolService, RuntimeStatus};
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// BusMsg: daemon-level SSE payload
// ---------------------------------------------------------------------------

/// Daemon messages surfaced as SSE events next to the engine's own
/// `RuntimeEvent`s.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Returned by GET /v1/status and carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    /// SHA-256 of the canonical merged config, when one was loaded.
    pub config_hash: Option<String>,
    /// "postgres" | "memory"
    pub store: &'static str,
    pub runtime: RuntimeStatus,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for daemon-level SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub service: Arc<PatrolService>,
    pub config_hash: Option<String>,
    pub store_kind: &'static str,
}

impl AppState {
    pub fn new(service: Arc<PatrolService>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "pve-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            service,
            config_hash: None,
            store_kind: "memory",
        }
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn with_store_kind(mut self, kind: &'static str) -> Self {
        self.store_kind = kind;
        self
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            config_hash: self.config_hash.clone(),
            store: self.store_kind,
            runtime: self.service.status(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
