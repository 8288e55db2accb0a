//! HTTP surface for the diagnostics collector.
//!
//! Reporting applications register themselves and post faults here; the
//! collector packages each report in the background. All routes live under
//! `/api/v1` except the service index at `/`.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use hds_core::{
    CaptureRequest, Collector, FaultSignature, FaultTimeSeries, IncomingFault, IndexEntry,
    RegisteredApplication,
};

type AppState = Arc<Collector>;

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RegisterRequest {
    #[serde(alias = "Application")]
    application: String,
    #[serde(alias = "Version")]
    version: String,
    #[serde(alias = "RegistrationId", alias = "registration_id")]
    registration_id: Option<String>,
}

#[derive(Serialize)]
struct RegisterResponse {
    status: &'static str,
    registration_id: String,
    application: String,
    version: String,
    registered: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Serialize)]
struct AppsResponse {
    count: usize,
    applications: Vec<RegisteredApplication>,
}

#[derive(Serialize)]
struct ReportResponse {
    status: &'static str,
    fault_id: Uuid,
    timestamp: DateTime<Utc>,
    occurrence_count: u32,
}

/// List item for `GET /faults`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FaultSummary {
    id: Uuid,
    app: String,
    code: String,
    description: String,
    severity: String,
    #[serde(rename = "type")]
    fault_type: String,
    type_description: String,
    timestamp: DateTime<Utc>,
    last_timestamp: DateTime<Utc>,
    count: u32,
}

impl From<&FaultSignature> for FaultSummary {
    fn from(f: &FaultSignature) -> Self {
        Self {
            id: f.fault_id,
            app: f.application_name.clone(),
            code: f.fault_code.clone(),
            description: f.description.clone(),
            severity: f.severity.clone(),
            fault_type: f.fault_type.clone(),
            type_description: f.type_description.clone(),
            timestamp: f.timestamp,
            last_timestamp: f.last_timestamp,
            count: f.occurrence_count,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FaultDetail {
    #[serde(flatten)]
    summary: FaultSummary,
    capture_request: CaptureRequest,
    /// Archive name; empty until packaging succeeds.
    package: String,
    timeseries: FaultTimeSeries,
}

#[derive(Serialize)]
struct FaultListResponse {
    count: usize,
    faults: Vec<FaultSummary>,
}

#[derive(Serialize)]
struct PackagesResponse {
    count: usize,
    packages: Vec<IndexEntry>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_register(
    State(collector): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    if req.application.trim().is_empty() || req.version.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "application and version are required",
        ));
    }
    let app = collector.register_app(
        &req.application,
        &req.version,
        req.registration_id.as_deref(),
    );
    Ok(Json(RegisterResponse {
        status: "registered",
        registration_id: app.registration_id,
        application: app.application,
        version: app.version,
        registered: app.registered,
        last_seen: app.last_seen,
    }))
}

async fn handle_apps(State(collector): State<AppState>) -> Json<AppsResponse> {
    let applications = collector.apps().list_all();
    Json(AppsResponse {
        count: applications.len(),
        applications,
    })
}

async fn handle_report(
    State(collector): State<AppState>,
    payload: Result<Json<IncomingFault>, JsonRejection>,
) -> Result<Json<ReportResponse>, ApiError> {
    let Json(incoming) = payload.map_err(|e| {
        warn!("rejected fault report: {}", e.body_text());
        api_error(StatusCode::BAD_REQUEST, e.body_text())
    })?;
    if incoming.application_name.trim().is_empty() || incoming.fault_code.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "ApplicationName and FaultCode are required",
        ));
    }
    let stored = collector.report_incoming(incoming);
    Ok(Json(ReportResponse {
        status: "fault_recorded",
        fault_id: stored.fault_id,
        timestamp: stored.timestamp,
        occurrence_count: stored.occurrence_count,
    }))
}

fn fault_list(faults: Vec<FaultSignature>) -> Json<FaultListResponse> {
    let faults: Vec<FaultSummary> = faults.iter().map(FaultSummary::from).collect();
    Json(FaultListResponse {
        count: faults.len(),
        faults,
    })
}

async fn handle_faults(State(collector): State<AppState>) -> Json<FaultListResponse> {
    fault_list(collector.registry().list_all())
}

async fn handle_faults_for_app(
    State(collector): State<AppState>,
    Path(application): Path<String>,
) -> Json<FaultListResponse> {
    fault_list(collector.registry().list_for_application(&application))
}

async fn handle_fault(
    State(collector): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FaultDetail>, ApiError> {
    let not_found = || api_error(StatusCode::NOT_FOUND, format!("fault {id} not found"));
    let fault_id = Uuid::parse_str(&id).map_err(|_| not_found())?;
    let fault = collector.registry().get(fault_id).ok_or_else(not_found)?;
    Ok(Json(FaultDetail {
        summary: FaultSummary::from(&fault),
        capture_request: fault.capture_request,
        package: fault.package_file,
        timeseries: fault.time_series,
    }))
}

async fn handle_clear(State(collector): State<AppState>) -> Json<serde_json::Value> {
    let removed = collector.registry().len();
    collector.clear();
    Json(serde_json::json!({ "status": "cleared", "removed": removed }))
}

async fn handle_download(
    State(collector): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    let not_found = || api_error(StatusCode::NOT_FOUND, format!("package {file} not found"));
    let path = collector.package_path(&file).ok_or_else(not_found)?;
    let archive = tokio::fs::File::open(&path).await.map_err(|e| {
        warn!("failed to open {}: {e}", path.display());
        not_found()
    })?;
    let body = Body::from_stream(ReaderStream::new(archive));
    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file}\""),
        ),
    ];
    Ok((headers, body).into_response())
}

async fn handle_packages(
    State(collector): State<AppState>,
) -> Result<Json<PackagesResponse>, ApiError> {
    let packages = collector
        .index()
        .load()
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(PackagesResponse {
        count: packages.len(),
        packages,
    }))
}

async fn handle_index(State(collector): State<AppState>) -> Json<serde_json::Value> {
    let config = collector.config();
    Json(serde_json::json!({
        "name": config.collector_name,
        "version": hds_core::VERSION,
        "faults": collector.registry().len(),
        "applications": collector.apps().len(),
        "sampling": {
            "samples": config.sampler.sample_count,
            "interval_ms": config.sampler.interval.as_millis() as u64,
        },
        "endpoints": {
            "/": "This API index",
            "/api/v1/apps/register": {
                "method": "POST",
                "description": "Register a reporting application",
                "body": "{application, version, registrationId?}",
            },
            "/api/v1/apps": "List registered applications",
            "/api/v1/faults/report": {
                "method": "POST",
                "description": "Report a fault; packaging runs in the background",
                "body": "{ApplicationName, FaultCode, Type, Severity, Description, Timestamp?, CaptureRequest{LogFileLocation, Capture[], Environment[]}}",
            },
            "/api/v1/faults": "List faults, most recently observed first (DELETE clears)",
            "/api/v1/faults/app/{application}": "List faults for one application",
            "/api/v1/faults/{id}": "Fault detail with package and time series",
            "/api/v1/faults/package/{file}": "Download a diagnostic package",
            "/api/v1/packages": "Package index",
        },
    }))
}

/// Build the axum router over a collector. The caller decides whether to
/// [`start`](Collector::start) the collector.
pub fn build_router(collector: Arc<Collector>) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/api/v1/apps/register", post(handle_register))
        .route("/api/v1/apps", get(handle_apps))
        .route("/api/v1/faults/report", post(handle_report))
        .route("/api/v1/faults", get(handle_faults).delete(handle_clear))
        .route("/api/v1/faults/app/{application}", get(handle_faults_for_app))
        .route("/api/v1/faults/package/{file}", get(handle_download))
        .route("/api/v1/faults/{id}", get(handle_fault))
        .route("/api/v1/packages", get(handle_packages))
        .with_state(collector)
}

/// Start the collector and serve until Ctrl-C.
pub async fn run_server(collector: Arc<Collector>, host: &str, port: u16) -> std::io::Result<()> {
    collector.start();
    let app = build_router(Arc::clone(&collector));
    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            collector.shutdown();
        })
        .await
}
