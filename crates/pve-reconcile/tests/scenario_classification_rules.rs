//! Scenario: per-event classification through the full engine.
//!
//! # Invariants under test
//!
//! 1. Window {22:00, 02:00} accepts 23:30 and 01:00, rejects 10:00.
//! 2. Point at (0,0), radius 50 m, scan 200 m away -> OUT_OF_RADIUS, even
//!    when the scan falls outside every shift.
//! 3. Two scans 10 s apart with cooldown 60 s -> second is TOO_SOON.
//! 4. At most one VALID per (scan point, round), across guards.
//! 5. Inactive / not-yet-configured points reject; later config versions
//!    never reclassify earlier instants.

use chrono::{DateTime, TimeZone, Utc};
use pve_reconcile::{Reconciler, Schedule};
use pve_registry::ScanPointRegistry;
use pve_schemas::{
    Classification, GeoPoint, RejectionReason, ScanEvent, ScanPoint, ScanSource, ShiftDef,
    TimeOfDay,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ts(d: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, h, m, s).unwrap()
}

fn shift(i: u32, a: &str, b: &str) -> ShiftDef {
    ShiftDef::new(i, TimeOfDay::parse(a).unwrap(), TimeOfDay::parse(b).unwrap())
}

/// UTC facility with three eight-hour shifts; route "DAY" only has 08-16.
fn schedule() -> Schedule {
    Schedule::new(
        chrono_tz::UTC,
        300,
        vec![
            shift(1, "00:00", "08:00"),
            shift(2, "08:00", "16:00"),
            shift(3, "16:00", "00:00"),
        ],
    )
    .with_route_shifts("DAY", vec![shift(1, "08:00", "16:00")])
}

fn point(json: serde_json::Value) -> ScanPoint {
    serde_json::from_value(json).unwrap()
}

fn engine() -> Reconciler {
    let mut reg = ScanPointRegistry::new();
    let from = ts(1, 0, 0, 0);
    reg.upsert(
        point(serde_json::json!({
            "id": "NIGHT", "factory_id": "F1", "route_id": "R1", "sequence_order": 1,
            "patrol_logic": { "expected_window": { "from": "22:00", "to": "02:00" } },
            "validation": { "cooldown_secs": 0 }
        })),
        from,
    )
    .unwrap();
    reg.upsert(
        point(serde_json::json!({
            "id": "GATE", "factory_id": "F1", "route_id": "DAY", "sequence_order": 1,
            "location": { "coordinates": { "lat": 0.0, "lon": 0.0 } },
            "validation": { "gps_required": true, "allowed_radius_meters": 50.0, "cooldown_secs": 0 }
        })),
        from,
    )
    .unwrap();
    reg.upsert(
        point(serde_json::json!({
            "id": "DOCK", "factory_id": "F1", "route_id": "R1", "sequence_order": 2,
            "validation": { "cooldown_secs": 60 }
        })),
        from,
    )
    .unwrap();
    Reconciler::new(schedule(), reg)
}

fn ev(guard: &str, point: &str, at: DateTime<Utc>, lat_m: Option<f64>) -> ScanEvent {
    let client = format!("{point}-{}", at.timestamp());
    ScanEvent {
        event_id: ScanEvent::derive_event_id(guard, &client),
        guard_id: guard.into(),
        scan_point_id: point.into(),
        factory_id: "F1".into(),
        timestamp: at,
        coordinates: lat_m.map(|m| GeoPoint::new(m / 111_195.0, 0.0)),
        source: ScanSource::Online,
        client_event_id: client,
        received_at: at,
    }
}

fn class(e: &mut Reconciler, event: ScanEvent) -> Classification {
    e.process(&event).unwrap().classification
}

// ---------------------------------------------------------------------------
// 1. Wrapping window
// ---------------------------------------------------------------------------

#[test]
fn wrapping_window_accepts_late_evening_and_early_morning() {
    let mut e = engine();
    assert_eq!(class(&mut e, ev("G1", "NIGHT", ts(1, 23, 30, 0), None)), Classification::Valid);
    assert_eq!(class(&mut e, ev("G2", "NIGHT", ts(2, 1, 0, 0), None)), Classification::Valid);

    let out = e.process(&ev("G3", "NIGHT", ts(2, 10, 0, 0), None)).unwrap();
    assert_eq!(out.classification, Classification::OutOfWindow);
    assert_eq!(out.deviation.seconds_outside_window, Some(8 * 3600));
}

// ---------------------------------------------------------------------------
// 2. Radius first
// ---------------------------------------------------------------------------

#[test]
fn far_scan_is_out_of_radius_regardless_of_timing() {
    let mut e = engine();
    // Inside the DAY shift.
    let out = e.process(&ev("G1", "GATE", ts(1, 9, 0, 0), Some(200.0))).unwrap();
    assert_eq!(out.classification, Classification::OutOfRadius);
    assert!((out.deviation.meters_from_point.unwrap() - 200.0).abs() < 1.0);
    // Outside every DAY shift.
    let out = e.process(&ev("G1", "GATE", ts(1, 20, 0, 0), Some(200.0))).unwrap();
    assert_eq!(out.classification, Classification::OutOfRadius);
    assert!(out.round_id.is_none());

    // Close enough, but outside every shift -> OUT_OF_WINDOW with no round.
    let out = e.process(&ev("G1", "GATE", ts(1, 21, 0, 0), Some(10.0))).unwrap();
    assert_eq!(out.classification, Classification::OutOfWindow);
    assert!(out.round_id.is_none());
}

// ---------------------------------------------------------------------------
// 3 + 4. Cooldown and duplicates
// ---------------------------------------------------------------------------

#[test]
fn cooldown_then_one_valid_per_round() {
    let mut e = engine();
    assert_eq!(class(&mut e, ev("G1", "DOCK", ts(1, 9, 0, 0), None)), Classification::Valid);
    assert_eq!(class(&mut e, ev("G1", "DOCK", ts(1, 9, 0, 10), None)), Classification::TooSoon);
    // Different guard, no cooldown history, same round.
    assert_eq!(class(&mut e, ev("G2", "DOCK", ts(1, 9, 5, 0), None)), Classification::Duplicate);
    // Same guard past the cooldown, same round.
    assert_eq!(class(&mut e, ev("G1", "DOCK", ts(1, 9, 30, 0), None)), Classification::Duplicate);
    // Next round.
    assert_eq!(class(&mut e, ev("G2", "DOCK", ts(1, 17, 0, 0), None)), Classification::Valid);

    let valid: Vec<_> = e
        .rounds()
        .filter(|r| r.has_valid("DOCK"))
        .map(|r| r.round_id.to_string())
        .collect();
    assert_eq!(valid, vec!["R1:2024-03-01:2", "R1:2024-03-01:3"]);
}

// ---------------------------------------------------------------------------
// 5. Effective-dated configuration
// ---------------------------------------------------------------------------

#[test]
fn inactive_and_unconfigured_points_are_rejected() {
    let mut e = engine();
    assert_eq!(
        e.process(&ev("G1", "DOCK", ts(1, 0, 0, 0) - chrono::Duration::seconds(1), None)),
        Err(RejectionReason::UnknownScanPoint)
    );

    e.deactivate_point("DOCK", ts(1, 12, 0, 0)).unwrap();
    assert_eq!(
        e.process(&ev("G1", "DOCK", ts(1, 12, 30, 0), None)),
        Err(RejectionReason::InactiveScanPoint)
    );
    // An earlier instant still uses the active version.
    assert_eq!(class(&mut e, ev("G1", "DOCK", ts(1, 11, 0, 0), None)), Classification::Valid);
}

#[test]
fn later_config_never_reclassifies_earlier_scans() {
    let mut e = engine();
    let mut wider = e.registry().get_point("GATE").unwrap().clone();
    wider.validation.allowed_radius_meters = 500.0;
    e.upsert_point(wider, ts(2, 0, 0, 0)).unwrap();

    assert_eq!(
        class(&mut e, ev("G1", "GATE", ts(1, 9, 0, 0), Some(200.0))),
        Classification::OutOfRadius
    );
    assert_eq!(
        class(&mut e, ev("G1", "GATE", ts(2, 9, 0, 0), Some(200.0))),
        Classification::Valid
    );
}
