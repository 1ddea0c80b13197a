use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::outcome::ScanOutcome;
use crate::round::RoundId;

// ---------------------------------------------------------------------------
// Device payload
// ---------------------------------------------------------------------------

/// Scan exactly as submitted by a guard's device. Nothing here is trusted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawScanEvent {
    pub guard_id: String,
    pub scan_point_id: String,
    /// RFC 3339 instant.
    pub timestamp: String,
    #[serde(default)]
    pub lat: Option<f64>,
    /// Older clients send longitude as `log`.
    #[serde(default, alias = "log")]
    pub lon: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
    pub client_event_id: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanSource {
    #[default]
    Online,
    Offline,
}

impl ScanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanSource::Online => "online",
            ScanSource::Offline => "offline",
        }
    }

    /// Case-insensitive; `None` for anything other than online/offline.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "online" => Some(ScanSource::Online),
            "offline" => Some(ScanSource::Offline),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalized event
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub event_id: Uuid,
    pub guard_id: String,
    pub scan_point_id: String,
    pub factory_id: String,
    pub timestamp: DateTime<Utc>,
    pub coordinates: Option<GeoPoint>,
    pub source: ScanSource,
    pub client_event_id: String,
    pub received_at: DateTime<Utc>,
}

impl ScanEvent {
    /// Idempotency-derived id: identical for every retransmission.
    pub fn derive_event_id(guard_id: &str, client_event_id: &str) -> Uuid {
        crate::derive_id(&["scan-event", guard_id, client_event_id])
    }
}

// ---------------------------------------------------------------------------
// Ingestion response
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    UnknownScanPoint,
    InactiveScanPoint,
    RoundAlreadyClosed { round_id: RoundId },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Disposition {
    Classified { outcome: ScanOutcome },
    Rejected { rejection: RejectionReason },
}

/// What the caller gets back for an accepted submission. A retransmission of
/// the same `(guard_id, client_event_id)` returns this value unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub event_id: Uuid,
    pub guard_id: String,
    pub client_event_id: String,
    #[serde(flatten)]
    pub disposition: Disposition,
}

impl IngestResponse {
    pub fn outcome(&self) -> Option<&ScanOutcome> {
        match &self.disposition {
            Disposition::Classified { outcome } => Some(outcome),
            Disposition::Rejected { .. } => None,
        }
    }
}
