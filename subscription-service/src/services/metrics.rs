//! Metrics module for subscription-service.
//! HTTP metrics come from the `metrics` recorder, service metrics from a
//! dedicated Prometheus registry; both are rendered by [`get_metrics`].

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{
    histogram_opts, opts, Encoder, HistogramTimer, HistogramVec, IntCounterVec, Registry,
    TextEncoder,
};
use service_core::error::AppError;
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Service operations by operation and outcome
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Database query duration histogram
pub static DB_QUERY_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once; later calls are no-ops.
pub fn init_metrics() -> Result<(), AppError> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        AppError::InternalError(anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))
    })?;
    let _ = METRICS_HANDLE.set(handle);

    let registry = Registry::new();

    let operations = IntCounterVec::new(
        opts!(
            "subscription_operations_total",
            "Total subscription operations by operation and outcome"
        ),
        &["operation", "outcome"],
    )
    .map_err(registration_error)?;

    let db_duration = HistogramVec::new(
        histogram_opts!(
            "subscription_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"],
    )
    .map_err(registration_error)?;

    registry
        .register(Box::new(operations.clone()))
        .map_err(registration_error)?;
    registry
        .register(Box::new(db_duration.clone()))
        .map_err(registration_error)?;

    let _ = PROMETHEUS_REGISTRY.set(registry);
    let _ = SUBSCRIPTION_OPERATIONS_TOTAL.set(operations);
    let _ = DB_QUERY_DURATION.set(db_duration);

    Ok(())
}

fn registration_error(e: prometheus::Error) -> AppError {
    AppError::InternalError(anyhow::anyhow!("Failed to register metric: {}", e))
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        let encoder = TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

/// Record the outcome of a service operation.
pub fn record_operation(operation: &str, outcome: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation, outcome]).inc();
    }
}

/// Start timing a database query. The duration is observed when the timer drops.
pub fn db_timer(operation: &str) -> Option<HistogramTimer> {
    DB_QUERY_DURATION
        .get()
        .map(|histogram| histogram.with_label_values(&[operation]).start_timer())
}
