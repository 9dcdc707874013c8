//! Worker metrics.
//!
//! Counters are recorded through the `metrics` facade and are no-ops until
//! a recorder is installed with [`install_prometheus`].

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::error::{WorkerError, WorkerResult};

/// Metric name constants for consistency.
pub mod names {
    /// Jobs finished, labelled by final `status`.
    pub const JOBS_TOTAL: &str = "clipclub_jobs_total";

    /// Render stage wall time, labelled by `stage`.
    pub const STAGE_DURATION_SECONDS: &str = clipclub_media::compose::STAGE_DURATION_SECONDS;

    /// Clip download attempts that failed and were retried.
    pub const DOWNLOAD_RETRIES_TOTAL: &str = "clipclub_download_retries_total";
}

/// Record a job reaching a final status.
pub fn record_job(status: &str) {
    counter!(names::JOBS_TOTAL, "status" => status.to_string()).increment(1);
}

/// Record a retried download attempt.
pub fn record_download_retry() {
    counter!(names::DOWNLOAD_RETRIES_TOTAL).increment(1);
}

/// Serve a Prometheus scrape endpoint on `0.0.0.0:port`.
///
/// Must be called from inside the tokio runtime.
pub fn install_prometheus(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}
