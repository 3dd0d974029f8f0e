//! Health, metrics and plugin endpoints
//!
//! - `/healthz` - Liveness: Is the process alive?
//! - `/readyz` - Readiness: Is the router ready to take plugin calls?
//! - `/metrics` - Prometheus metrics in text format
//! - `/api/v1/*` - Traffic router plugin operations (see `api`)

use crate::router::TrafficRouterPlugin;
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::ShutdownSignal;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared state for readiness tracking
///
/// Set to ready once the Kubernetes client is up; cleared again on shutdown.
#[derive(Debug, Clone)]
pub struct ReadinessState {
    ready: Arc<AtomicBool>,
}

impl ReadinessState {
    /// Create a new readiness state (initially not ready)
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the router as not ready (e.g., during shutdown)
    ///
    /// The readiness probe then returns 503 and the pod stops receiving
    /// plugin calls.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by every handler
#[derive(Clone)]
pub struct ServerState {
    pub(crate) readiness: ReadinessState,
    pub(crate) metrics: SharedMetrics,
    pub(crate) plugin: Arc<TrafficRouterPlugin>,
}

impl ServerState {
    pub fn new(
        readiness: ReadinessState,
        metrics: SharedMetrics,
        plugin: Arc<TrafficRouterPlugin>,
    ) -> Self {
        Self {
            readiness,
            metrics,
            plugin,
        }
    }
}

/// Liveness probe handler
///
/// Always returns 200 OK - if this responds, the process is alive.
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe handler
async fn readyz(State(state): State<ServerState>) -> StatusCode {
    if state.readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

pub(crate) fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(self::metrics))
        .nest("/api/v1", super::api::routes())
        .with_state(state)
}

/// Serve probes, metrics and plugin calls until `shutdown` fires
///
/// In-flight requests are allowed to complete before this returns.
///
/// # Arguments
/// * `port` - The port to listen on
/// * `state` - Readiness, metrics and the plugin behind the API
/// * `shutdown` - Signal that stops the server
pub async fn run_server(
    port: u16,
    state: ServerState,
    shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    // Log after successful bind - server is actually listening
    info!(port = %port, "Traffic router server listening (HTTP)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.recv())
        .await?;
    info!("Traffic router server stopped");
    Ok(())
}
