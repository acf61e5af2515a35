//! HTTP server for health, status and metrics endpoints

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::metrics::{SharedMetrics, SharedStats, SideStats};

/// Static facts about the running oracle
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub src_family: String,
    pub dst_family: String,
    pub scanning: Vec<String>,
    pub pair_ids: Vec<String>,
}

/// Combined app state
#[derive(Clone)]
pub struct AppState {
    pub stats: SharedStats,
    pub metrics: SharedMetrics,
    pub info: ServiceInfo,
    pub started_at: Instant,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub src_family: String,
    pub dst_family: String,
    pub src_latest_height: u64,
    pub dst_latest_height: u64,
}

#[derive(Debug, Serialize)]
pub struct SideStatus {
    pub latest_height: u64,
    pub cursor: u64,
    pub registered: u64,
    pub rejected: u64,
    pub errors: u64,
}

impl From<&SideStats> for SideStatus {
    fn from(s: &SideStats) -> Self {
        Self {
            latest_height: s.latest_height.load(Ordering::Relaxed),
            cursor: s.cursor.load(Ordering::Relaxed),
            registered: s.registered.load(Ordering::Relaxed),
            rejected: s.rejected.load(Ordering::Relaxed),
            errors: s.errors.load(Ordering::Relaxed),
        }
    }
}

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    #[serde(flatten)]
    pub info: ServiceInfo,
    pub src: SideStatus,
    pub dst: SideStatus,
}

/// Health check endpoint handler
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        src_family: state.info.src_family.clone(),
        dst_family: state.info.dst_family.clone(),
        src_latest_height: state.stats.src.latest_height.load(Ordering::Relaxed),
        dst_latest_height: state.stats.dst.latest_height.load(Ordering::Relaxed),
    })
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Readiness probe: ready once a scanner has processed a block
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.stats.is_ready() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        info: state.info.clone(),
        src: SideStatus::from(&state.stats.src),
        dst: SideStatus::from(&state.stats.dst),
    })
}

/// Prometheus metrics endpoint
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/status", get(status))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Start the HTTP server; returns when `shutdown` flips to `true`.
pub async fn start_server(
    bind_address: &str,
    port: u16,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> eyre::Result<()> {
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("API server listening on {}", addr);
    info!("  /status  - Scanner status (JSON)");
    info!("  /metrics - Prometheus metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}
