//! Scenario: many guards race to scan the same point in the same round.
//!
//! Exactly one submission is VALID; every other one is DUPLICATE, and the
//! store agrees.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use pve_db::{MemoryStore, PatrolStore};
use pve_reconcile::Schedule;
use pve_runtime::{FixedClock, PatrolService, RuntimeSettings};
use pve_schemas::{Classification, RawScanEvent, RoundId, ScanPoint, ShiftDef, TimeOfDay};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    chrono_tz::Asia::Kolkata
        .with_ymd_and_hms(2024, 3, 1, h, m, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn tod(s: &str) -> TimeOfDay {
    TimeOfDay::parse(s).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_guards_yield_a_single_valid() {
    let store = Arc::new(MemoryStore::new());
    let svc = Arc::new(PatrolService::new(
        Schedule::new(
            chrono_tz::Asia::Kolkata,
            300,
            vec![ShiftDef::new(1, tod("09:00"), tod("10:00"))],
        ),
        RuntimeSettings::default(),
        store.clone(),
        Arc::new(FixedClock::new(at(9, 45))),
    ));
    let point: ScanPoint = serde_json::from_value(serde_json::json!({
        "id": "P1", "factory_id": "F1", "route_id": "R1", "sequence_order": 1
    }))
    .unwrap();
    svc.upsert_scan_point(point, Some(at(0, 0) - Duration::days(1)))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for g in 0..16u32 {
        let svc = Arc::clone(&svc);
        handles.push(tokio::spawn(async move {
            let raw = RawScanEvent {
                guard_id: format!("G{g}"),
                scan_point_id: "P1".into(),
                timestamp: at(9, 10 + g).to_rfc3339(),
                client_event_id: "c-1".into(),
                ..Default::default()
            };
            svc.ingest_scan(&raw).await.unwrap()
        }));
    }
    let mut classes = Vec::new();
    for h in handles {
        let result = h.await.unwrap();
        assert!(!result.duplicate);
        classes.push(result.response.outcome().unwrap().classification);
    }

    let valid = classes.iter().filter(|c| **c == Classification::Valid).count();
    let dup = classes.iter().filter(|c| **c == Classification::Duplicate).count();
    assert_eq!(valid, 1);
    assert_eq!(dup, 15);

    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let round = svc.round(&RoundId::new("R1", date, 1)).unwrap();
    assert!(round.has_valid("P1"));

    let stored = store.outcomes_for_date(date).await.unwrap();
    assert_eq!(stored.len(), 16);
    assert_eq!(
        stored.iter().filter(|o| o.classification == Classification::Valid).count(),
        1
    );
}
