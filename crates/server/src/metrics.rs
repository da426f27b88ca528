//! Prometheus metrics for observability.
//!
//! HTTP request metrics are recorded by middleware. Coordinator and
//! controller gauges are collected from live state right before encoding.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "sluice_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sluice_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "sluice_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Coordinator Metrics (collected dynamically)
// =============================================================================

pub static COORDINATOR_CAPACITY: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("sluice_coordinator_capacity", "Configured capacity per category"),
        &["category"],
    )
    .unwrap()
});

pub static COORDINATOR_ACTIVE_WEIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "sluice_coordinator_active_weight",
            "Weight currently held by active leases",
        ),
        &["category"],
    )
    .unwrap()
});

pub static COORDINATOR_QUEUE_LENGTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "sluice_coordinator_queue_length",
            "Requests waiting for capacity",
        ),
        &["category"],
    )
    .unwrap()
});

// =============================================================================
// Controller Metrics (collected dynamically)
// =============================================================================

pub static ORCHESTRATIONS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "sluice_orchestrations_running",
        "Orchestrations with a run in progress",
    )
    .unwrap()
});

pub static CONTROLLERS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "sluice_controllers_active",
        "Controllers currently activated in memory",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Coordinators
    registry
        .register(Box::new(COORDINATOR_CAPACITY.clone()))
        .unwrap();
    registry
        .register(Box::new(COORDINATOR_ACTIVE_WEIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(COORDINATOR_QUEUE_LENGTH.clone()))
        .unwrap();

    // Controllers
    registry
        .register(Box::new(ORCHESTRATIONS_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(CONTROLLERS_ACTIVE.clone()))
        .unwrap();

    // Core metrics (runs, items, leases, collaborators, notifications)
    for metric in sluice_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Refresh gauges from live coordinator and controller state.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    for status in state.coordinators().statuses().await {
        let labels = [status.category.as_str()];
        COORDINATOR_CAPACITY
            .with_label_values(&labels)
            .set(status.capacity as i64);
        COORDINATOR_ACTIVE_WEIGHT
            .with_label_values(&labels)
            .set(status.active_weight as i64);
        COORDINATOR_QUEUE_LENGTH
            .with_label_values(&labels)
            .set(status.queue_length as i64);
    }

    let registry = state.registry();
    ORCHESTRATIONS_RUNNING.set(registry.running_count().await as i64);
    CONTROLLERS_ACTIVE.set(registry.active_count().await as i64);
}

/// Normalize a path for metric labels (replace keys and IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let key_regex = regex_lite::Regex::new(r"[0-9a-f]{64}").unwrap();
    let uuid_regex = regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap();
    let numeric_regex = regex_lite::Regex::new(r"/\d+(/|$)").unwrap();

    let result = key_regex.replace_all(path, "{key}");
    let result = uuid_regex.replace_all(&result, "{id}");
    let result = numeric_regex.replace_all(&result, "/{id}$1");
    result.to_string()
}
