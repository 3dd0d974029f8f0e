//! Prometheus metrics for router operations
//!
//! - `trafficrouter_operations_total{operation, result}` - operations served
//! - `trafficrouter_operation_duration_seconds{operation}` - operation latency

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics shared between the HTTP handlers and the `/metrics` endpoint
pub type SharedMetrics = Arc<RouterMetrics>;

pub struct RouterMetrics {
    registry: Registry,
    operations_total: IntCounterVec,
    operation_duration_seconds: HistogramVec,
}

impl RouterMetrics {
    /// Create and register all metrics in a private registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new(
                "trafficrouter_operations_total",
                "Traffic router operations by outcome",
            ),
            &["operation", "result"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "trafficrouter_operation_duration_seconds",
                "Time spent serving traffic router operations",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            operation_duration_seconds,
        })
    }

    pub fn record_success(&self, operation: &str, duration_secs: f64) {
        self.record(operation, "success", duration_secs);
    }

    pub fn record_error(&self, operation: &str, duration_secs: f64) {
        self.record(operation, "error", duration_secs);
    }

    fn record(&self, operation: &str, result: &str, duration_secs: f64) {
        self.operations_total
            .with_label_values(&[operation, result])
            .inc();
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Render every metric in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(RouterMetrics::new()?))
}
