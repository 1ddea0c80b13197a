//! Ingest ordering: unknown point beats malformed payload; duplicates are
//! answered from the prior response, never rejected.

use chrono::{DateTime, TimeZone, Utc};
use pve_ingest::{ingest, IngestError, IngestPolicy, Ingested, MalformedEvent, ResponseIndex};
use pve_registry::ScanPointRegistry;
use pve_schemas::{Disposition, IngestResponse, RawScanEvent, RejectionReason, ScanPoint};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()
}

fn registry() -> ScanPointRegistry {
    let mut reg = ScanPointRegistry::new();
    let p: ScanPoint = serde_json::from_value(serde_json::json!({
        "id": "P1", "factory_id": "F1", "route_id": "R1", "sequence_order": 1
    }))
    .unwrap();
    reg.upsert(p, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .unwrap();
    reg
}

fn raw(point: &str, client: &str) -> RawScanEvent {
    RawScanEvent {
        guard_id: "G1".into(),
        scan_point_id: point.into(),
        timestamp: "2024-03-01T05:00:00Z".into(),
        lat: None,
        lon: None,
        source: None,
        client_event_id: client.into(),
    }
}

#[test]
fn unknown_point_is_reported_before_malformed_fields() {
    let reg = registry();
    let mut bad = raw("P9", "c-1");
    bad.timestamp = "not a time".into();
    let err = ingest(&reg, &ResponseIndex::new(), &bad, now(), IngestPolicy::default()).unwrap_err();
    assert_eq!(err, IngestError::UnknownScanPoint { id: "P9".into() });

    let mut bad = raw("P1", "c-1");
    bad.timestamp = "not a time".into();
    let err = ingest(&reg, &ResponseIndex::new(), &bad, now(), IngestPolicy::default()).unwrap_err();
    assert!(matches!(err, IngestError::Malformed(MalformedEvent::BadTimestamp { .. })));
}

#[test]
fn retransmission_returns_prior_response() {
    let reg = registry();
    let mut index = ResponseIndex::new();

    let first = match ingest(&reg, &index, &raw("P1", "c-1"), now(), IngestPolicy::default()).unwrap() {
        Ingested::Accepted(ev) => ev,
        other => panic!("expected first sighting, got {other:?}"),
    };
    assert_eq!(first.factory_id, "F1");

    let response = IngestResponse {
        event_id: first.event_id,
        guard_id: first.guard_id.clone(),
        client_event_id: first.client_event_id.clone(),
        disposition: Disposition::Rejected {
            rejection: RejectionReason::InactiveScanPoint,
        },
    };
    index.record(response.clone());

    for _ in 0..2 {
        match ingest(&reg, &index, &raw("P1", "c-1"), now(), IngestPolicy::default()).unwrap() {
            Ingested::Duplicate(prior) => assert_eq!(prior, response),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    // Another guard may reuse the same client id.
    let mut other_guard = raw("P1", "c-1");
    other_guard.guard_id = "G2".into();
    assert!(matches!(
        ingest(&reg, &index, &other_guard, now(), IngestPolicy::default()).unwrap(),
        Ingested::Accepted(_)
    ));
    assert_eq!(index.len(), 1);
}

#[test]
fn prefetched_response_only_matches_its_own_key() {
    let reg = registry();
    let prior = Some(IngestResponse {
        event_id: pve_schemas::ScanEvent::derive_event_id("G1", "c-7"),
        guard_id: "G1".into(),
        client_event_id: "c-7".into(),
        disposition: Disposition::Rejected {
            rejection: RejectionReason::UnknownScanPoint,
        },
    });
    assert!(matches!(
        ingest(&reg, &prior, &raw("P1", "c-8"), now(), IngestPolicy::default()).unwrap(),
        Ingested::Accepted(_)
    ));
    assert!(matches!(
        ingest(&reg, &prior, &raw("P1", "c-7"), now(), IngestPolicy::default()).unwrap(),
        Ingested::Duplicate(_)
    ));
}
