//! Request and response types for the pve-daemon HTTP endpoints.
//!
//! No business logic lives here. Analytics and report bodies come straight
//! from `pve-query`.

use chrono::{DateTime, Utc};
use pve_schemas::ScanPoint;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable machine-readable class, e.g. "validation", "round_already_closed".
    pub kind: String,
}

// ---------------------------------------------------------------------------
// /v1/rounds/close
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseRoundsResponse {
    pub closed_rounds: Vec<String>,
    pub missed_outcomes: usize,
    pub stale_factories: Vec<String>,
    pub truncated_factories: Vec<String>,
}

// ---------------------------------------------------------------------------
// /v1/scan-points
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanPointsQuery {
    pub factory_id: Option<String>,
}

/// New configuration version. `effective_from` defaults to now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertScanPointRequest {
    #[serde(flatten)]
    pub point: ScanPoint,
    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeactivateScanPointRequest {
    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// /v1/analytics/*  /v1/report/download
// ---------------------------------------------------------------------------

// Dates arrive as strings so a bad value yields a structured 400 instead of
// the extractor's plain-text rejection.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactoryDateQuery {
    pub factory_code: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetDateQuery {
    pub target_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessScansRequest {
    pub target_date: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    pub factory_code: Option<String>,
    pub report_date: Option<String>,
}
