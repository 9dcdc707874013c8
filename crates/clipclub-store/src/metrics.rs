//! Job store metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Store operations by operation and outcome.
    pub const QUERIES_TOTAL: &str = "clipclub_store_queries_total";

    /// Store operation latency in seconds by operation.
    pub const QUERY_SECONDS: &str = "clipclub_store_query_seconds";
}

/// Record metrics for a completed store operation.
pub fn record_query(operation: &'static str, ok: bool, latency_secs: f64) {
    counter!(
        names::QUERIES_TOTAL,
        "operation" => operation,
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(names::QUERY_SECONDS, "operation" => operation).record(latency_secs);
}
