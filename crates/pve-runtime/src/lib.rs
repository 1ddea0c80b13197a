//! pve-runtime
//!
//! The concurrent patrol service: ingestion, reconciliation, closing sweep,
//! scan point administration, reprocessing and the cached read side, wired
//! to a [`pve_db::PatrolStore`] and a [`Clock`].
//!
//! The pure crates decide; this crate locks, persists, applies and logs.

mod clock;
mod error;
mod events;
mod retry;
mod service;
mod settings;
mod sweep;
mod view;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::PatrolError;
pub use events::RuntimeEvent;
pub use service::{IngestResult, PatrolService, RecoveryReport, RuntimeStatus};
pub use settings::RuntimeSettings;
pub use sweep::{run_sweep_loop, spawn_sweep};
