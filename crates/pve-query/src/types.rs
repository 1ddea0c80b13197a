use chrono::NaiveDate;
use pve_schemas::PerformanceMetric;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsOverview {
    pub date: NaiveDate,
    /// Expected point-rounds scheduled for the date.
    pub total_expected_rounds: u64,
    pub active_guards: u64,
    pub inactive_guards: u64,
    pub missed_scans: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardScan {
    pub guard_name: String,
    pub scan_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedScansResponse {
    pub factory_code: String,
    pub missed_scan_count: u64,
    pub missed_scan_points: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardPerformanceResponse {
    pub target_date: NaiveDate,
    pub metrics: Vec<PerformanceMetric>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanActivity {
    /// Local hour bucket, `HH:00`.
    pub time: String,
    pub scans: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardChartData {
    pub name: String,
    pub scans: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardChartsResponse {
    pub activity_data: Vec<ScanActivity>,
    pub guard_data: Vec<GuardChartData>,
}

/// Reply of the explicit reprocessing operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_count: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Success,
    Missed,
    Pending,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatrolReportItem {
    pub scan_point_id: String,
    pub qr_name: String,
    pub route_id: String,
    pub round: u32,
    /// Local time of the VALID scan, RFC 3339.
    pub scan_time: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub guard_name: Option<String>,
    pub status: ReportStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatrolReportResponse {
    pub factory_code: String,
    pub report_date: NaiveDate,
    pub items: Vec<PatrolReportItem>,
}
