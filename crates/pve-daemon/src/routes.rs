//! Axum router and HTTP handlers for pve-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers, so tests can drive the bare router.
//!
//! Every error leaves as `{error, kind}` JSON with a status derived from the
//! [`PatrolError`] taxonomy.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use futures_util::{Stream, StreamExt};
use pve_query::{
    AnalyticsOverview, DashboardChartsResponse, DateRange, GuardPerformanceResponse, GuardScan,
    MissedScansResponse, PatrolReportResponse, ProcessResponse,
};
use pve_runtime::{PatrolError, RuntimeEvent};
use pve_schemas::{RawScanEvent, ScanPoint, ScanPointVersion};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::{
    api_types::{
        CloseRoundsResponse, DateQuery, DateRangeQuery, DeactivateScanPointRequest, ErrorResponse,
        FactoryDateQuery, HealthResponse, ProcessScansRequest, ReportQuery, ScanPointsQuery,
        TargetDateQuery, UpsertScanPointRequest,
    },
    state::{AppState, BusMsg, StatusSnapshot},
};

/// Set on every POST /v1/scans reply: "true" when the submission was a
/// retransmission answered from the stored response.
pub const DUPLICATE_HEADER: &str = "x-pve-duplicate";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/scans", post(submit_scan))
        .route("/v1/rounds/close", post(close_rounds))
        .route("/v1/scan-points", get(list_scan_points).post(upsert_scan_point))
        .route("/v1/scan-points/:id/deactivate", post(deactivate_scan_point))
        .route("/v1/analytics/overview", get(overview))
        .route("/v1/analytics/scans-by-guard", get(scans_by_guard))
        .route("/v1/analytics/missed-scans", get(missed_scans))
        .route("/v1/analytics/guard-performance", get(guard_performance))
        .route("/v1/analytics/dashboard-charts", get(dashboard_charts))
        .route("/v1/analytics/process-scans", post(process_scans))
        .route("/v1/report/download", get(report_download))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn validation(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                error: msg.into(),
                kind: "validation".to_string(),
            },
        }
    }
}

fn status_for(err: &PatrolError) -> StatusCode {
    match err {
        PatrolError::Validation(_) => StatusCode::BAD_REQUEST,
        PatrolError::UnknownScanPoint { .. } => StatusCode::NOT_FOUND,
        PatrolError::InactiveScanPoint { .. }
        | PatrolError::RoundAlreadyClosed { .. }
        | PatrolError::ConfigConflict { .. } => StatusCode::CONFLICT,
        PatrolError::StorageFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<PatrolError> for ApiError {
    fn from(err: PatrolError) -> Self {
        Self {
            status: status_for(&err),
            body: ErrorResponse {
                error: err.to_string(),
                kind: err.kind().to_string(),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rej: JsonRejection) -> Self {
        ApiError::validation(rej.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation(format!("{field} must be YYYY-MM-DD, got '{raw}'")))
}

fn opt_date(field: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| parse_date(field, s))
        .transpose()
}

fn required<'a>(field: &str, raw: Option<&'a str>) -> Result<&'a str, ApiError> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation(format!("{field} is required")))
}

/// Local calendar date in the engine's time zone.
fn today(st: &AppState) -> NaiveDate {
    st.service.schedule().local_date(st.service.now())
}

// ---------------------------------------------------------------------------
// GET /v1/health  GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    let snap = st.snapshot();
    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    Json(snap)
}

// ---------------------------------------------------------------------------
// POST /v1/scans
// ---------------------------------------------------------------------------

/// Ingest one scan. Business rejections map to 404/409 but are still stored,
/// so a retransmission gets the same status and body.
pub(crate) async fn submit_scan(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<RawScanEvent>, JsonRejection>,
) -> Response {
    let raw = match payload {
        Ok(Json(raw)) => raw,
        Err(rej) => return ApiError::from(rej).into_response(),
    };

    let result = match st.service.ingest_scan(&raw).await {
        Ok(r) => r,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let dup = HeaderValue::from_static(if result.duplicate { "true" } else { "false" });

    match result.rejection(raw.scan_point_id.trim()) {
        Some(err) => {
            let mut resp = ApiError::from(err).into_response();
            resp.headers_mut().insert(DUPLICATE_HEADER, dup);
            resp
        }
        None => (StatusCode::OK, [(DUPLICATE_HEADER, dup)], Json(result.response)).into_response(),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/rounds/close
// ---------------------------------------------------------------------------

pub(crate) async fn close_rounds(
    State(st): State<Arc<AppState>>,
) -> Result<Json<CloseRoundsResponse>, ApiError> {
    let report = st.service.close_expired_rounds().await?;
    info!(
        closed = report.closed_rounds.len(),
        missed = report.missed.len(),
        "rounds/close"
    );
    Ok(Json(CloseRoundsResponse {
        closed_rounds: report.closed_rounds.iter().map(ToString::to_string).collect(),
        missed_outcomes: report.missed.len(),
        stale_factories: report.stale_factories,
        truncated_factories: report.truncated_factories,
    }))
}

// ---------------------------------------------------------------------------
// /v1/scan-points
// ---------------------------------------------------------------------------

pub(crate) async fn list_scan_points(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ScanPointsQuery>,
) -> Json<Vec<ScanPoint>> {
    Json(st.service.list_scan_points(q.factory_id.as_deref()))
}

pub(crate) async fn upsert_scan_point(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<UpsertScanPointRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ScanPointVersion>), ApiError> {
    let Json(req) = payload?;
    let version = st
        .service
        .upsert_scan_point(req.point, req.effective_from)
        .await?;
    info!(scan_point_id = %version.point.id, version = version.version, "scan-points/upsert");
    Ok((StatusCode::CREATED, Json(version)))
}

pub(crate) async fn deactivate_scan_point(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<DeactivateScanPointRequest>>,
) -> Result<Json<ScanPointVersion>, ApiError> {
    let effective_from = body.and_then(|Json(b)| b.effective_from);
    let version = st.service.deactivate_scan_point(&id, effective_from).await?;
    info!(scan_point_id = %id, version = version.version, "scan-points/deactivate");
    Ok(Json(version))
}

// ---------------------------------------------------------------------------
// /v1/analytics/*
// ---------------------------------------------------------------------------

pub(crate) async fn overview(
    State(st): State<Arc<AppState>>,
    Query(q): Query<DateQuery>,
) -> Result<Json<AnalyticsOverview>, ApiError> {
    let date = opt_date("date", q.date.as_deref())?.unwrap_or_else(|| today(&st));
    Ok(Json(st.service.overview(date)))
}

pub(crate) async fn scans_by_guard(
    State(st): State<Arc<AppState>>,
    Query(q): Query<DateRangeQuery>,
) -> Result<Json<Vec<GuardScan>>, ApiError> {
    let from = opt_date("start_date", q.start_date.as_deref())?;
    let to = opt_date("end_date", q.end_date.as_deref())?;
    let range = match (from, to) {
        (None, None) => None,
        (from, to) => {
            let all = DateRange::all();
            Some(DateRange::new(from.unwrap_or(all.from), to.unwrap_or(all.to)))
        }
    };
    Ok(Json(st.service.scans_by_guard(range)))
}

pub(crate) async fn missed_scans(
    State(st): State<Arc<AppState>>,
    Query(q): Query<FactoryDateQuery>,
) -> Result<Json<MissedScansResponse>, ApiError> {
    let factory = required("factory_code", q.factory_code.as_deref())?;
    let date = opt_date("date", q.date.as_deref())?.unwrap_or_else(|| today(&st));
    Ok(Json(st.service.missed_scans(factory, date)))
}

pub(crate) async fn guard_performance(
    State(st): State<Arc<AppState>>,
    Query(q): Query<TargetDateQuery>,
) -> Result<Json<GuardPerformanceResponse>, ApiError> {
    let date = opt_date("target_date", q.target_date.as_deref())?.unwrap_or_else(|| today(&st));
    Ok(Json(st.service.guard_performance(date)))
}

pub(crate) async fn dashboard_charts(
    State(st): State<Arc<AppState>>,
    Query(q): Query<FactoryDateQuery>,
) -> Result<Json<DashboardChartsResponse>, ApiError> {
    let date = opt_date("date", q.date.as_deref())?.unwrap_or_else(|| today(&st));
    let factory = q.factory_code.as_deref().map(str::trim).filter(|s| !s.is_empty());
    Ok(Json(st.service.dashboard_charts(factory, date)))
}

pub(crate) async fn process_scans(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<ProcessScansRequest>, JsonRejection>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let Json(req) = payload?;
    let date = parse_date("target_date", &req.target_date)?;
    let resp = st.service.reprocess(date).await?;
    info!(%date, processed = ?resp.processed_count, "analytics/process-scans");
    Ok(Json(resp))
}

// ---------------------------------------------------------------------------
// GET /v1/report/download
// ---------------------------------------------------------------------------

pub(crate) async fn report_download(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ReportQuery>,
) -> Result<Json<PatrolReportResponse>, ApiError> {
    let factory = required("factory_code", q.factory_code.as_deref())?;
    let raw_date = required("report_date", q.report_date.as_deref())?;
    let date = parse_date("report_date", raw_date)?;
    Ok(Json(st.service.patrol_report(factory, date)))
}

// ---------------------------------------------------------------------------
// GET /v1/stream (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let events = futures_util::stream::select(
        bus_to_sse(st.bus.subscribe()),
        runtime_to_sse(st.service.subscribe()),
    );

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn bus_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        // Lagged or closed receivers drop the message.
        let m = msg.ok()?;
        let event_name = match &m {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Status(_) => "status",
        };
        let data = serde_json::to_string(&m).ok()?;
        Some(Ok(Event::default().event(event_name).data(data)))
    })
}

fn runtime_to_sse(
    rx: broadcast::Receiver<RuntimeEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        let m = msg.ok()?;
        let event_name = match &m {
            RuntimeEvent::Outcome { .. } => "outcome",
            RuntimeEvent::RoundsClosed { .. } => "rounds_closed",
            RuntimeEvent::Log { .. } => "log",
        };
        let data = serde_json::to_string(&m).ok()?;
        Some(Ok(Event::default().event(event_name).data(data)))
    })
}
