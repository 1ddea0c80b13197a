//! One event through the engine, against borrowed state.
//!
//! Both the single-threaded [`Reconciler`](crate::Reconciler) and the
//! concurrent service runtime call [`decide`], so a batch replay and
//! per-event processing classify identically.

use chrono::{DateTime, Utc};
use pve_registry::ScanPointRegistry;
use pve_schemas::{
    Classification, RejectionReason, RoundRecord, ScanEvent, ScanOutcome, ScanPoint,
};

use crate::classify::{classify, ClassifyInput, KeyHistory};
use crate::rounds::round_for_event;
use crate::schedule::{Schedule, ShiftOccurrence};

#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Rejected(RejectionReason),
    Classified {
        outcome: ScanOutcome,
        /// New state of the enclosing round; persist before applying.
        round: Option<RoundRecord>,
    },
}

impl Decision {
    pub fn outcome(&self) -> Option<&ScanOutcome> {
        match self {
            Decision::Classified { outcome, .. } => Some(outcome),
            Decision::Rejected(_) => None,
        }
    }
}

/// Configuration in force at the event instant.
pub fn point_in_force<'r>(
    registry: &'r ScanPointRegistry,
    scan_point_id: &str,
    at: DateTime<Utc>,
) -> Result<&'r ScanPoint, RejectionReason> {
    let point = registry
        .resolve_at(scan_point_id, at)
        .ok_or(RejectionReason::UnknownScanPoint)?;
    if !point.is_active() {
        return Err(RejectionReason::InactiveScanPoint);
    }
    Ok(point)
}

/// Where an event lands: its point configuration and enclosing shift.
#[derive(Clone, Debug)]
pub struct Placement<'r> {
    pub point: &'r ScanPoint,
    pub occurrence: Option<ShiftOccurrence>,
}

pub fn place<'r>(
    schedule: &Schedule,
    registry: &'r ScanPointRegistry,
    event: &ScanEvent,
) -> Result<Placement<'r>, RejectionReason> {
    let point = point_in_force(registry, &event.scan_point_id, event.timestamp)?;
    let occurrence = schedule.locate(&point.route_id, event.timestamp);
    Ok(Placement { point, occurrence })
}

/// Classify `event` given its placement, the existing round record (if any),
/// the factory's sweep watermark and the `(guard, point)` VALID history.
pub fn decide(
    schedule: &Schedule,
    registry: &ScanPointRegistry,
    placement: &Placement<'_>,
    event: &ScanEvent,
    existing_round: Option<&RoundRecord>,
    sweep_watermark: Option<DateTime<Utc>>,
    history: &KeyHistory,
) -> Decision {
    let point = placement.point;

    let mut round = match &placement.occurrence {
        Some(occ) => match round_for_event(
            schedule,
            registry,
            &point.factory_id,
            occ,
            existing_round,
            sweep_watermark,
        ) {
            Ok(r) => Some(r),
            Err(reason) => return Decision::Rejected(reason),
        },
        None => None,
    };

    let (local_date, local_time) = schedule.local_parts(event.timestamp);
    let (classification, deviation) = classify(&ClassifyInput {
        point,
        event,
        local_time,
        round: round.as_ref(),
        history,
    });

    let outcome = ScanOutcome {
        outcome_id: ScanOutcome::for_event_id(event.event_id),
        scan_event_id: Some(event.event_id),
        scan_point_id: point.id.clone(),
        factory_id: point.factory_id.clone(),
        round_id: round.as_ref().map(|r| r.round_id.clone()),
        guard_id: Some(event.guard_id.clone()),
        classification,
        deviation,
        occurred_at: event.timestamp,
        service_date: round.as_ref().map_or(local_date, RoundRecord::service_date),
    };

    if let Some(r) = round.as_mut() {
        if r.accountable_guard.is_none() {
            r.accountable_guard = Some(event.guard_id.clone());
        }
        if classification == Classification::Valid {
            r.record_valid(&point.id, outcome.outcome_id);
        }
    }

    Decision::Classified { outcome, round }
}
