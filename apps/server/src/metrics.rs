//! Metrics collection for the search engine
//!
//! Prometheus metrics registered in the default registry and exposed at `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
};

lazy_static! {
    // HTTP Request Metrics

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fieldsearch_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS_TOTAL");

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "fieldsearch_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");

    /// In-flight HTTP requests
    pub static ref HTTP_REQUESTS_IN_FLIGHT: IntGaugeVec = register_int_gauge_vec!(
        "fieldsearch_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
        &["method", "path"]
    )
    .expect("Failed to register HTTP_REQUESTS_IN_FLIGHT");

    // Search Metrics

    /// Search executions by module and status (ok, error, invalid)
    pub static ref SEARCH_EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fieldsearch_search_executions_total",
        "Total number of search executions",
        &["module", "status"]
    )
    .expect("Failed to register SEARCH_EXECUTIONS_TOTAL");

    /// Result cache lookups by result (hit, miss)
    pub static ref CACHE_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fieldsearch_cache_requests_total",
        "Result cache lookups",
        &["result"]
    )
    .expect("Failed to register CACHE_REQUESTS_TOTAL");

    /// Result cache warm-up duration by outcome (warm, oversized, failed)
    pub static ref CACHE_WARMUP_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "fieldsearch_cache_warmup_duration_seconds",
        "Result cache warm-up duration in seconds",
        &["outcome"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("Failed to register CACHE_WARMUP_DURATION_SECONDS");

    // Database Metrics

    /// Database query duration
    pub static ref DB_QUERY_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "fieldsearch_db_query_duration_seconds",
        "Database query duration in seconds",
        &["query_type"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .expect("Failed to register DB_QUERY_DURATION_SECONDS");

    // Schedule Metrics

    /// Scheduled runs by outcome (succeeded, failed)
    pub static ref SCHEDULE_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fieldsearch_schedule_runs_total",
        "Total number of scheduled search runs",
        &["outcome"]
    )
    .expect("Failed to register SCHEDULE_RUNS_TOTAL");

    /// Schedules disabled after reaching the failure threshold
    pub static ref SCHEDULES_DISABLED_TOTAL: IntCounter = register_int_counter!(
        "fieldsearch_schedules_disabled_total",
        "Schedules automatically disabled after repeated failures"
    )
    .expect("Failed to register SCHEDULES_DISABLED_TOTAL");
}

/// Helper to sanitize path for metrics labels (remove IDs, limit cardinality)
pub fn sanitize_path(path: &str) -> String {
    let sanitized: Vec<&str> = path
        .split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                "{id}"
            } else {
                segment
            }
        })
        .collect();
    let joined = sanitized.join("/");
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}
