//! Prometheus metrics for settlement-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for HTTP requests by method, path, and status.
pub static HTTP_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS")
});

/// Histogram for HTTP request duration by method and path.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "settlement_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION")
});

/// Counter for gateway calls by operation and outcome.
pub static GATEWAY_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_gateway_requests_total",
        "Total number of EMP gateway calls",
        &["operation", "outcome"]
    )
    .expect("Failed to register GATEWAY_REQUESTS")
});

/// Counter for reconciliation runs by outcome.
pub static RECONCILIATION_RUNS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_reconciliation_runs_total",
        "Total number of reconciliation runs",
        &["outcome"]
    )
    .expect("Failed to register RECONCILIATION_RUNS")
});

/// Counter for reconciled rows by classification.
pub static ROWS_CLASSIFIED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_rows_classified_total",
        "Total number of rows classified during reconciliation",
        &["classification"]
    )
    .expect("Failed to register ROWS_CLASSIFIED")
});

/// Counter for blacklist additions by source and outcome.
pub static BLACKLIST_ADDITIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_blacklist_additions_total",
        "Total number of blacklist add attempts",
        &["source", "outcome"]
    )
    .expect("Failed to register BLACKLIST_ADDITIONS")
});

/// Counter for chargeback pipeline items by outcome.
pub static CHARGEBACK_ITEMS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_chargeback_items_total",
        "Total number of chargebacks processed by the blacklist pipeline",
        &["outcome"]
    )
    .expect("Failed to register CHARGEBACK_ITEMS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&GATEWAY_REQUESTS);
    Lazy::force(&RECONCILIATION_RUNS);
    Lazy::force(&ROWS_CLASSIFIED);
    Lazy::force(&BLACKLIST_ADDITIONS);
    Lazy::force(&CHARGEBACK_ITEMS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_http_request(method: &str, path: &str, status: &str, duration_secs: f64) {
    HTTP_REQUESTS
        .with_label_values(&[method, path, status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

pub fn record_gateway_request(operation: &str, outcome: &str) {
    GATEWAY_REQUESTS
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn record_reconciliation_run(outcome: &str) {
    RECONCILIATION_RUNS.with_label_values(&[outcome]).inc();
}

pub fn record_row_classified(classification: &str) {
    ROWS_CLASSIFIED.with_label_values(&[classification]).inc();
}

pub fn record_blacklist_addition(source: &str, outcome: &str) {
    BLACKLIST_ADDITIONS
        .with_label_values(&[source, outcome])
        .inc();
}

pub fn record_chargeback_item(outcome: &str) {
    CHARGEBACK_ITEMS.with_label_values(&[outcome]).inc();
}
