//! pve-query
//!
//! Read-only projections over outcomes, rounds and performance rows.
//!
//! Nothing here mutates engine state. Results are cached per query key and
//! invalidated whenever the view's generation moves.

mod facade;
mod types;
mod view;

pub use facade::{CacheStats, QueryFacade};
pub use types::{
    AnalyticsOverview, DashboardChartsResponse, GuardChartData, GuardPerformanceResponse,
    GuardScan, MissedScansResponse, PatrolReportItem, PatrolReportResponse, ProcessResponse,
    ReportStatus, ScanActivity,
};
pub use view::{DateRange, PatrolView};
