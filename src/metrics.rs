//! Prometheus counters for load, query and store activity

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    // === Load Counters ===

    /// Source records walked, by kind (sample or mark)
    pub static ref RECORDS_PROCESSED: CounterVec = register_counter_vec!(
        "pmseries_records_processed_total",
        "Source records processed during load",
        &["kind"]
    ).unwrap();

    /// Values appended to series sample logs
    pub static ref VALUES_STORED: CounterVec = register_counter_vec!(
        "pmseries_values_stored_total",
        "Sample values written to the store",
        &["semantics"]
    ).unwrap();

    /// Series whose metadata was persisted
    pub static ref SERIES_DISCOVERED: CounterVec = register_counter_vec!(
        "pmseries_series_discovered_total",
        "Series discovered and cached",
        &["indom"]
    ).unwrap();

    /// Metrics or samples skipped, by reason
    pub static ref ITEMS_SKIPPED: CounterVec = register_counter_vec!(
        "pmseries_items_skipped_total",
        "Metrics or samples skipped during load",
        &["reason"]
    ).unwrap();

    // === Query Counters ===

    /// Queries solved, by outcome
    pub static ref QUERIES_SOLVED: CounterVec = register_counter_vec!(
        "pmseries_queries_total",
        "Queries solved against the store",
        &["status"]
    ).unwrap();

    /// Query solve latency
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "pmseries_query_duration_seconds",
        "Query latency in seconds",
        &["windowed"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // === Store Counters ===

    /// Pipelines sent to the store
    pub static ref STORE_ROUND_TRIPS: CounterVec = register_counter_vec!(
        "pmseries_store_round_trips_total",
        "Pipelined round trips to the store",
        &["backend"]
    ).unwrap();

    /// Commands carried by those pipelines
    pub static ref STORE_COMMANDS: CounterVec = register_counter_vec!(
        "pmseries_store_commands_total",
        "Commands sent to the store",
        &["backend"]
    ).unwrap();

    /// Pipelines that failed or timed out
    pub static ref STORE_FAILURES: CounterVec = register_counter_vec!(
        "pmseries_store_failures_total",
        "Failed or timed out store round trips",
        &["backend"]
    ).unwrap();

    /// Round-trip latency
    pub static ref STORE_LATENCY: HistogramVec = register_histogram_vec!(
        "pmseries_store_round_trip_seconds",
        "Store round-trip latency in seconds",
        &["backend"],
        vec![0.0001, 0.001, 0.01, 0.1, 1.0]
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a skipped metric or sample
#[inline]
pub fn record_skip(reason: &str) {
    ITEMS_SKIPPED.with_label_values(&[reason]).inc();
}

/// Record a solved (or failed) query
#[inline]
pub fn record_query(duration_secs: f64, windowed: bool, success: bool) {
    let status = if success { "success" } else { "error" };
    QUERIES_SOLVED.with_label_values(&[status]).inc();
    QUERY_DURATION
        .with_label_values(&[if windowed { "true" } else { "false" }])
        .observe(duration_secs);
}

/// Record a completed store round trip
#[inline]
pub fn record_round_trip(backend: &str, commands: usize, duration_secs: f64) {
    STORE_ROUND_TRIPS.with_label_values(&[backend]).inc();
    STORE_COMMANDS.with_label_values(&[backend]).inc_by(commands as f64);
    STORE_LATENCY.with_label_values(&[backend]).observe(duration_secs);
}

/// Record a failed store round trip
#[inline]
pub fn record_store_failure(backend: &str) {
    STORE_FAILURES.with_label_values(&[backend]).inc();
}
