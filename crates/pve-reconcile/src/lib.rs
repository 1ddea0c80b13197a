//! pve-reconcile
//!
//! Reconciliation Engine: classifies normalized scan events against the
//! configuration in force, owns round lifecycle, and closes expired rounds
//! with synthetic MISSED outcomes.
//!
//! Deterministic, pure logic. No IO, no wall-clock. Callers pass `now`.

mod classify;
mod decide;
mod engine;
mod rounds;
mod schedule;
mod watermark;

pub use classify::{classify, history_cutoff, ClassifyInput, KeyHistory};
pub use decide::{decide, place, point_in_force, Decision, Placement};
pub use engine::{check_config_change, Reconciler, SweepReport};
pub use rounds::{close_round, plan_round, round_for_event};
pub use schedule::{Schedule, ShiftOccurrence};
pub use watermark::{plan_sweep, SweepFreshness, SweepPlan, SweepWatermark};
