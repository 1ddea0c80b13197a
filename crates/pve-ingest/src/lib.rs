//! pve-ingest
//!
//! Event Ingestor: turns untrusted device payloads into normalized
//! [`ScanEvent`]s.
//!
//! Checks run in a fixed order:
//! 1. the scan point must be known to the registry;
//! 2. the payload must be well formed (ids, RFC 3339 timestamp, future skew,
//!    coordinates, source);
//! 3. `(guard_id, client_event_id)` is deduplicated. A retransmission returns
//!    the prior response and is never an error.
//!
//! Deterministic, pure logic. No IO. Persistence is the runtime's job.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use pve_registry::ScanPointRegistry;
use pve_schemas::{GeoPoint, IngestResponse, RawScanEvent, ScanEvent, ScanSource};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a payload could not be normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum MalformedEvent {
    EmptyField { field: &'static str },
    BadTimestamp { raw: String },
    FutureTimestamp { ahead_secs: i64, max_secs: u64 },
    NonFiniteCoordinate,
    CoordinatesOutOfRange { lat: f64, lon: f64 },
    PartialCoordinates,
    UnknownSource { raw: String },
}

impl fmt::Display for MalformedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedEvent::EmptyField { field } => write!(f, "'{field}' must not be empty"),
            MalformedEvent::BadTimestamp { raw } => {
                write!(f, "timestamp '{raw}' is not RFC 3339")
            }
            MalformedEvent::FutureTimestamp {
                ahead_secs,
                max_secs,
            } => write!(
                f,
                "timestamp is {ahead_secs}s in the future (max skew {max_secs}s)"
            ),
            MalformedEvent::NonFiniteCoordinate => write!(f, "lat/lon must be finite"),
            MalformedEvent::CoordinatesOutOfRange { lat, lon } => {
                write!(f, "coordinates out of range: lat={lat} lon={lon}")
            }
            MalformedEvent::PartialCoordinates => {
                write!(f, "lat and lon must be sent together")
            }
            MalformedEvent::UnknownSource { raw } => {
                write!(f, "unknown source '{raw}' (expected online|offline)")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    UnknownScanPoint { id: String },
    Malformed(MalformedEvent),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::UnknownScanPoint { id } => write!(f, "unknown scan point '{id}'"),
            IngestError::Malformed(m) => write!(f, "malformed scan event: {m}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<MalformedEvent> for IngestError {
    fn from(value: MalformedEvent) -> Self {
        IngestError::Malformed(value)
    }
}

// ---------------------------------------------------------------------------
// Dedupe lookup
// ---------------------------------------------------------------------------

/// Source of previously issued responses, keyed by `(guard_id, client_event_id)`.
pub trait ResponseLookup {
    fn prior_response(&self, guard_id: &str, client_event_id: &str) -> Option<IngestResponse>;
}

/// A single prefetched response (e.g. read from the store before ingesting).
impl ResponseLookup for Option<IngestResponse> {
    fn prior_response(&self, guard_id: &str, client_event_id: &str) -> Option<IngestResponse> {
        self.as_ref()
            .filter(|r| r.guard_id == guard_id && r.client_event_id == client_event_id)
            .cloned()
    }
}

/// In-memory response index used by batch replay.
#[derive(Debug, Default, Clone)]
pub struct ResponseIndex {
    by_key: BTreeMap<(String, String), IngestResponse>,
}

impl ResponseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// First response per key wins.
    pub fn record(&mut self, response: IngestResponse) {
        self.by_key
            .entry((response.guard_id.clone(), response.client_event_id.clone()))
            .or_insert(response);
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl ResponseLookup for ResponseIndex {
    fn prior_response(&self, guard_id: &str, client_event_id: &str) -> Option<IngestResponse> {
        self.by_key
            .get(&(guard_id.to_string(), client_event_id.to_string()))
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestPolicy {
    pub max_future_skew_secs: u64,
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            max_future_skew_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    /// First sighting; hand to the reconciliation engine.
    Accepted(ScanEvent),
    /// Retransmission; reply with the stored response unchanged.
    Duplicate(IngestResponse),
}

pub fn ingest<L: ResponseLookup + ?Sized>(
    registry: &ScanPointRegistry,
    prior: &L,
    raw: &RawScanEvent,
    now: DateTime<Utc>,
    policy: IngestPolicy,
) -> Result<Ingested, IngestError> {
    let point = registry
        .get_point(raw.scan_point_id.trim())
        .ok_or_else(|| IngestError::UnknownScanPoint {
            id: raw.scan_point_id.clone(),
        })?;

    let event = normalize(raw, &point.factory_id, now, policy)?;

    match prior.prior_response(&event.guard_id, &event.client_event_id) {
        Some(resp) => Ok(Ingested::Duplicate(resp)),
        None => Ok(Ingested::Accepted(event)),
    }
}

/// Validate and normalize one payload. `factory_id` comes from the registry.
pub fn normalize(
    raw: &RawScanEvent,
    factory_id: &str,
    now: DateTime<Utc>,
    policy: IngestPolicy,
) -> Result<ScanEvent, MalformedEvent> {
    let guard_id = non_empty(&raw.guard_id, "guard_id")?;
    let client_event_id = non_empty(&raw.client_event_id, "client_event_id")?;
    let scan_point_id = non_empty(&raw.scan_point_id, "scan_point_id")?;

    let timestamp = DateTime::parse_from_rfc3339(raw.timestamp.trim())
        .map_err(|_| MalformedEvent::BadTimestamp {
            raw: raw.timestamp.clone(),
        })?
        .with_timezone(&Utc);

    let ahead = timestamp - now;
    let max_skew_ms = i64::try_from(policy.max_future_skew_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    if ahead.num_milliseconds() > max_skew_ms {
        return Err(MalformedEvent::FutureTimestamp {
            ahead_secs: ahead.num_seconds(),
            max_secs: policy.max_future_skew_secs,
        });
    }

    let coordinates = match (raw.lat, raw.lon) {
        (None, None) => None,
        (Some(lat), Some(lon)) => {
            if !lat.is_finite() || !lon.is_finite() {
                return Err(MalformedEvent::NonFiniteCoordinate);
            }
            let p = GeoPoint::new(lat, lon);
            if !p.is_valid() {
                return Err(MalformedEvent::CoordinatesOutOfRange { lat, lon });
            }
            Some(p)
        }
        _ => return Err(MalformedEvent::PartialCoordinates),
    };

    let source = match raw.source.as_deref() {
        None => ScanSource::Online,
        Some(s) => ScanSource::parse(s).ok_or_else(|| MalformedEvent::UnknownSource {
            raw: s.to_string(),
        })?,
    };

    Ok(ScanEvent {
        event_id: ScanEvent::derive_event_id(&guard_id, &client_event_id),
        guard_id,
        scan_point_id,
        factory_id: factory_id.to_string(),
        timestamp,
        coordinates,
        source,
        client_event_id,
        received_at: now,
    })
}

fn non_empty(value: &str, field: &'static str) -> Result<String, MalformedEvent> {
    let t = value.trim();
    if t.is_empty() {
        return Err(MalformedEvent::EmptyField { field });
    }
    Ok(t.to_string())
}
