//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for stage processing with
//! tracing spans and contextual information.

use std::time::Duration;
use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vpipe_models::{JobId, StageName};

/// Initialize tracing: colored output for dev, JSON when `LOG_FORMAT=json`.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "vpipe=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the job ID and stage so one job's history can be
/// pulled out of interleaved worker output.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    stage: StageName,
}

impl JobLogger {
    pub fn new(job_id: &JobId, stage: StageName) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
        }
    }

    pub fn log_attempt(&self, attempt: u32) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            attempt,
            "Stage attempt started"
        );
    }

    pub fn log_retry(&self, attempt: u32, delay: Duration, cause: &dyn std::fmt::Display) {
        warn!(
            job_id = %self.job_id,
            stage = %self.stage,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Stage attempt failed, retrying: {}", cause
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            stage = %self.stage,
            "Stage warning: {}", message
        );
    }

    pub fn log_failure(&self, attempts: u32, cause: &dyn std::fmt::Display) {
        error!(
            job_id = %self.job_id,
            stage = %self.stage,
            attempts,
            "Stage failed: {}", cause
        );
    }

    pub fn log_completion(&self, attempt: u32, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            attempt,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage committed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stage(&self) -> StageName {
        self.stage
    }

    /// Create a tracing span for this stage invocation.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "stage",
            job_id = %self.job_id,
            stage = %self.stage
        )
    }
}
