//! pve-schemas
//!
//! Shared data model for the patrol verification workspace.
//!
//! Every type here is `Serialize + Deserialize` so it can cross the store,
//! the HTTP daemon and the CLI unchanged. No business logic beyond small,
//! deterministic helpers (time-of-day arithmetic, great-circle distance,
//! deterministic id derivation) lives in this crate.

mod clock;
mod event;
mod geo;
mod metric;
mod outcome;
mod point;
mod round;

pub use clock::{ShiftDef, TimeOfDay, TimeOfDayParseError, TimeWindow, SECS_PER_DAY};
pub use event::{Disposition, IngestResponse, RawScanEvent, RejectionReason, ScanEvent, ScanSource};
pub use geo::{GeoPoint, EARTH_RADIUS_METERS};
pub use metric::{performance_score, PerformanceMetric};
pub use outcome::{Classification, Deviation, ScanOutcome};
pub use point::{
    Location, PatrolLogic, PointStatus, ScanPoint, ScanPointVersion, ValidationRules,
    DEFAULT_COOLDOWN_SECS,
};
pub use round::{RoundId, RoundRecord, RoundStatus};

use uuid::Uuid;

/// Namespace for every deterministic (v5) identifier minted by the engine.
///
/// Event ids, outcome ids and synthetic MISSED ids are all derived from this
/// namespace so that replaying the same input produces byte-identical ids.
pub const PATROL_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_2a47_93d0_4b5e_a8f2_0d3c_71e9_5b24);

/// Derive a deterministic id from a `|`-joined key.
pub fn derive_id(parts: &[&str]) -> Uuid {
    Uuid::new_v5(&PATROL_NAMESPACE, parts.join("|").as_bytes())
}
