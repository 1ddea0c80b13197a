//! Round lifecycle: planning, per-event resolution and closing.

use chrono::{DateTime, Utc};
use pve_registry::ScanPointRegistry;
use pve_schemas::{
    Classification, Deviation, RejectionReason, RoundRecord, RoundStatus, ScanOutcome,
};

use crate::schedule::{Schedule, ShiftOccurrence};

/// Fresh OPEN round for an occurrence.
///
/// Expected points are the active, required points of the route in force at
/// the round's start whose expected window overlaps the shift.
pub fn plan_round(
    schedule: &Schedule,
    registry: &ScanPointRegistry,
    factory_id: &str,
    occ: &ShiftOccurrence,
) -> RoundRecord {
    let expected_points = registry
        .route_points_at(factory_id, &occ.route_id, occ.starts_at)
        .into_iter()
        .filter(|p| p.required && occ.shift.overlaps(&p.patrol_logic.expected_window))
        .map(|p| p.id.clone())
        .collect();

    RoundRecord {
        round_id: occ.round_id(),
        factory_id: factory_id.to_string(),
        starts_at: occ.starts_at,
        ends_at: occ.ends_at,
        closes_at: occ.closes_at,
        expected_points,
        valid_points: Default::default(),
        accountable_guard: schedule.assigned_guard(&occ.route_id).map(str::to_string),
        status: RoundStatus::Open,
    }
}

/// The round an event at `occ` lands in: the existing record, or a newly
/// planned one. Closed rounds, and rounds the factory's sweep has already
/// passed, reject the event.
pub fn round_for_event(
    schedule: &Schedule,
    registry: &ScanPointRegistry,
    factory_id: &str,
    occ: &ShiftOccurrence,
    existing: Option<&RoundRecord>,
    sweep_watermark: Option<DateTime<Utc>>,
) -> Result<RoundRecord, RejectionReason> {
    match existing {
        Some(r) if r.is_closed() => Err(RejectionReason::RoundAlreadyClosed {
            round_id: r.round_id.clone(),
        }),
        Some(r) => Ok(r.clone()),
        None if sweep_watermark.is_some_and(|wm| occ.closes_at <= wm) => {
            Err(RejectionReason::RoundAlreadyClosed {
                round_id: occ.round_id(),
            })
        }
        None => Ok(plan_round(schedule, registry, factory_id, occ)),
    }
}

/// Mark the round CLOSED and emit one MISSED per expected point lacking a
/// VALID. Already-closed rounds yield nothing.
pub fn close_round(round: &mut RoundRecord) -> Vec<ScanOutcome> {
    if round.is_closed() {
        return Vec::new();
    }
    let missed: Vec<ScanOutcome> = round
        .unsatisfied_points()
        .map(|point_id| missed_outcome(round, point_id))
        .collect();
    round.status = RoundStatus::Closed;
    missed
}

fn missed_outcome(round: &RoundRecord, scan_point_id: &str) -> ScanOutcome {
    ScanOutcome {
        outcome_id: ScanOutcome::missed_id(&round.round_id, scan_point_id),
        scan_event_id: None,
        scan_point_id: scan_point_id.to_string(),
        factory_id: round.factory_id.clone(),
        round_id: Some(round.round_id.clone()),
        guard_id: round.accountable_guard.clone(),
        classification: Classification::Missed,
        deviation: Deviation::default(),
        occurred_at: round.ends_at,
        service_date: round.service_date(),
    }
}
