//! Prometheus metrics for the worker.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use vpipe_models::StageName;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const STAGE_ATTEMPTS_TOTAL: &str = "vpipe_stage_attempts_total";
    pub const STAGE_FAILURES_TOTAL: &str = "vpipe_stage_failures_total";
    pub const STAGE_DURATION_SECONDS: &str = "vpipe_stage_duration_seconds";
    pub const JOBS_COMPLETED_TOTAL: &str = "vpipe_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vpipe_jobs_failed_total";
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {e}")))
}

/// Record the start of a stage attempt.
pub fn record_stage_attempt(stage: StageName) {
    counter!(names::STAGE_ATTEMPTS_TOTAL, "stage" => stage.as_str()).increment(1);
}

/// Record a failed attempt.
pub fn record_stage_failure(stage: StageName, retryable: bool) {
    let retryable = if retryable { "true" } else { "false" };
    counter!(names::STAGE_FAILURES_TOTAL, "stage" => stage.as_str(), "retryable" => retryable)
        .increment(1);
}

/// Record wall time of one attempt.
pub fn record_stage_duration(stage: StageName, duration_secs: f64) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str()).record(duration_secs);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed(stage: StageName) {
    counter!(names::JOBS_FAILED_TOTAL, "stage" => stage.as_str()).increment(1);
}
