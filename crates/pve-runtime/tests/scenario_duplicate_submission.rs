//! Scenario: retransmissions of one `(guard_id, client_event_id)`.
//!
//! Sequential or concurrent, exactly one submission is processed; every
//! other one gets the identical response flagged as a duplicate.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pve_db::MemoryStore;
use pve_reconcile::Schedule;
use pve_runtime::{FixedClock, PatrolService, RuntimeSettings};
use pve_schemas::{Classification, RawScanEvent, ScanPoint, ShiftDef, TimeOfDay};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    chrono_tz::Asia::Kolkata
        .with_ymd_and_hms(2024, 3, 1, h, m, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn tod(s: &str) -> TimeOfDay {
    TimeOfDay::parse(s).unwrap()
}

async fn service(store: Arc<MemoryStore>) -> PatrolService {
    let svc = PatrolService::new(
        Schedule::new(
            chrono_tz::Asia::Kolkata,
            300,
            vec![ShiftDef::new(1, tod("09:00"), tod("10:00"))],
        ),
        RuntimeSettings::default(),
        store,
        Arc::new(FixedClock::new(at(9, 30))),
    );
    let point: ScanPoint = serde_json::from_value(serde_json::json!({
        "id": "P1", "factory_id": "F1", "route_id": "R1", "sequence_order": 1
    }))
    .unwrap();
    svc.upsert_scan_point(point, Some(at(0, 0) - Duration::days(1)))
        .await
        .unwrap();
    svc
}

fn raw(client: &str, m: u32) -> RawScanEvent {
    RawScanEvent {
        guard_id: "G1".into(),
        scan_point_id: "P1".into(),
        timestamp: at(9, m).to_rfc3339(),
        client_event_id: client.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn retransmission_returns_stored_response() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(store.clone()).await;

    let first = svc.ingest_scan(&raw("c-1", 10)).await.unwrap();
    assert!(!first.duplicate);

    // Same key, different body: still the original answer.
    let second = svc.ingest_scan(&raw("c-1", 20)).await.unwrap();
    assert!(second.duplicate);
    assert_eq!(second.response, first.response);

    assert_eq!(store.event_count(), 1);
    assert_eq!(store.outcome_count(), 1);
    let metric = svc.aggregator().get("G1", at(9, 0).date_naive()).unwrap();
    assert_eq!(metric.total_points, 1);
    assert_eq!(metric.scanned_points, 1);
}

#[tokio::test]
async fn a_different_client_id_is_a_new_event() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(store.clone()).await;

    svc.ingest_scan(&raw("c-1", 10)).await.unwrap();
    let other = svc.ingest_scan(&raw("c-2", 12)).await.unwrap();
    assert!(!other.duplicate);
    assert_eq!(
        other.response.outcome().map(|o| o.classification),
        Some(Classification::TooSoon)
    );
    assert_eq!(store.event_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retransmissions_process_once() {
    let store = Arc::new(MemoryStore::new());
    let svc = Arc::new(service(store.clone()).await);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let svc = Arc::clone(&svc);
        handles.push(tokio::spawn(async move {
            svc.ingest_scan(&raw("c-1", 10)).await.unwrap()
        }));
    }
    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }

    assert_eq!(results.iter().filter(|r| !r.duplicate).count(), 1);
    let response = &results[0].response;
    assert!(results.iter().all(|r| &r.response == response));
    assert_eq!(store.event_count(), 1);
    assert_eq!(svc.status().outcomes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retransmission_naming_another_point_is_still_a_duplicate() {
    let store = Arc::new(MemoryStore::new());
    let svc = Arc::new(service(store.clone()).await);
    let p2: ScanPoint = serde_json::from_value(serde_json::json!({
        "id": "P2", "factory_id": "F1", "route_id": "R1", "sequence_order": 2
    }))
    .unwrap();
    svc.upsert_scan_point(p2, Some(at(0, 0) - Duration::days(1)))
        .await
        .unwrap();

    let guards: Vec<String> = (0..64).map(|i| format!("G{i}")).collect();
    let mut handles = Vec::new();
    for guard in &guards {
        for point in ["P1", "P2"] {
            let svc = Arc::clone(&svc);
            let ev = RawScanEvent {
                guard_id: guard.clone(),
                scan_point_id: point.into(),
                timestamp: at(9, 10).to_rfc3339(),
                client_event_id: "c-1".into(),
                ..Default::default()
            };
            handles.push((
                guard.clone(),
                tokio::spawn(async move { svc.ingest_scan(&ev).await.unwrap() }),
            ));
        }
    }

    let mut by_guard: std::collections::BTreeMap<String, Vec<_>> = Default::default();
    for (guard, h) in handles {
        by_guard.entry(guard).or_default().push(h.await.unwrap());
    }
    for (guard, results) in &by_guard {
        assert_eq!(
            results.iter().filter(|r| !r.duplicate).count(),
            1,
            "{guard} was processed twice"
        );
        assert_eq!(results[0].response, results[1].response);
    }
    assert_eq!(store.event_count(), guards.len());
    assert_eq!(store.outcome_count(), guards.len());
    assert_eq!(svc.status().events, guards.len());
}
