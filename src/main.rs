use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use trafficrouter::router::{KubeRouteStore, TrafficRouterPlugin};
use trafficrouter::server::{
    create_metrics, run_server, shutdown_channel, wait_for_signal, ReadinessState, ServerState,
};

/// Default port for probes, metrics and plugin endpoints (HTTP)
const DEFAULT_PORT: u16 = 8080;

/// Default time in-flight plugin calls get to finish on shutdown
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Port from `TRAFFICROUTER_PORT`, falling back to the default when unset or invalid
fn parse_port(value: Option<String>) -> u16 {
    match value {
        None => DEFAULT_PORT,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(value = %raw, default = DEFAULT_PORT, "Invalid TRAFFICROUTER_PORT, using default");
            DEFAULT_PORT
        }),
    }
}

/// Grace period from `TRAFFICROUTER_SHUTDOWN_GRACE_SECS`
fn parse_shutdown_grace(value: Option<String>) -> Duration {
    value
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SHUTDOWN_GRACE)
}

fn get_server_port() -> u16 {
    parse_port(std::env::var("TRAFFICROUTER_PORT").ok())
}

fn get_shutdown_grace() -> Duration {
    parse_shutdown_grace(std::env::var("TRAFFICROUTER_SHUTDOWN_GRACE_SECS").ok())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Gateway API traffic router");

    let (shutdown_controller, shutdown_signal) = shutdown_channel();

    // Create readiness state (initially not ready)
    let readiness = ReadinessState::new();

    let metrics = create_metrics()?;
    info!("Prometheus metrics registry initialized");

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let plugin = Arc::new(TrafficRouterPlugin::new(KubeRouteStore::new(client)));
    let state = ServerState::new(readiness.clone(), metrics, plugin);

    let port = get_server_port();
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = run_server(port, state, shutdown_signal).await {
            error!(error = %e, "Server failed");
        }
    });
    info!(port, "Server task spawned");

    readiness.set_ready();
    info!("Traffic router ready");

    tokio::select! {
        _ = &mut server_handle => {
            warn!("Server stopped before shutdown was requested");
            return Err(anyhow::anyhow!("server on port {} exited", port));
        }
        signal = wait_for_signal() => {
            let signal = signal?;
            info!(signal, "Initiating graceful shutdown");
            // Mark not ready so K8s stops sending traffic during shutdown
            readiness.set_not_ready();
        }
    }

    shutdown_controller.shutdown();

    let grace = get_shutdown_grace();
    if tokio::time::timeout(grace, &mut server_handle).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "In-flight requests did not finish in time");
        server_handle.abort();
    }

    info!("Traffic router shut down gracefully");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
