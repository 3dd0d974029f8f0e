//! HTTP server for probes, metrics and plugin operations
//!
//! Provides Kubernetes health probes:
//! - `/healthz` - Liveness probe (process is running)
//! - `/readyz` - Readiness probe (router is ready to serve)
//!
//! Also provides graceful shutdown handling for SIGTERM/SIGINT.

mod api;
mod health;
pub mod metrics;
pub mod shutdown;

pub use api::{
    OperationResponse, RolloutRequest, SetHeaderRouteRequest, SetWeightRequest, TypeResponse,
    UpdateHashRequest,
};
pub use health::{run_server, ReadinessState, ServerState};
pub use metrics::{create_metrics, RouterMetrics, SharedMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "api_test.rs"]
mod api_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
