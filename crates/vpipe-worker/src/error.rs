//! Worker error types.

use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use vpipe_media::{CommitError, MediaError, StageError};
use vpipe_models::{ErrorRecord, JobId, ModelError, StageName};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("{stage} stage exceeded soft time limit of {}s", .limit.as_secs())]
    SoftTimeLimit { stage: StageName, limit: Duration },

    #[error("{stage} stage exceeded hard time limit of {}s", .limit.as_secs())]
    HardTimeLimit { stage: StageName, limit: Duration },

    #[error("Invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Queue error: {0}")]
    Queue(#[from] vpipe_queue::QueueError),

    #[error("Commit error: {0}")]
    Commit(#[from] CommitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn invalid_invocation(msg: impl Into<String>) -> Self {
        Self::InvalidInvocation(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if error is retryable.
    ///
    /// Only a failing external tool and an attempt cut short by a time limit
    /// are worth another attempt. Missing inputs, missing binaries and commit
    /// failures fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Stage(e) => matches!(e.cause, MediaError::ToolExecution { .. }),
            WorkerError::SoftTimeLimit { .. } | WorkerError::HardTimeLimit { .. } => true,
            _ => false,
        }
    }

    /// Diagnostic key/value pairs for the failure record.
    pub fn diagnostics(&self) -> BTreeMap<String, String> {
        match self {
            WorkerError::Stage(e) => e.diagnostics(),
            WorkerError::Commit(e) => e.diagnostics(),
            WorkerError::SoftTimeLimit { limit, .. } => BTreeMap::from([
                ("limit".to_string(), "soft".to_string()),
                ("time_limit_secs".to_string(), limit.as_secs().to_string()),
            ]),
            WorkerError::HardTimeLimit { limit, .. } => BTreeMap::from([
                ("limit".to_string(), "hard".to_string()),
                ("time_limit_secs".to_string(), limit.as_secs().to_string()),
            ]),
            _ => BTreeMap::new(),
        }
    }
}

/// A stage that will not be attempted again.
#[derive(Debug)]
pub struct JobFailure {
    pub job_id: JobId,
    pub stage: StageName,
    pub error: WorkerError,
    /// Attempts actually made; 0 when the invocation was rejected up front
    pub attempts: u32,
}

impl JobFailure {
    pub fn new(job_id: JobId, stage: StageName, error: WorkerError, attempts: u32) -> Self {
        Self {
            job_id,
            stage,
            error,
            attempts,
        }
    }

    /// The `error.json` document for this failure.
    pub fn record(&self) -> ErrorRecord {
        ErrorRecord::new(self.job_id.clone(), self.stage, self.error.to_string())
            .with_attempts(self.attempts)
            .with_retryable(self.error.is_retryable())
            .with_details(self.error.diagnostics())
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "job {} failed at {} after {} attempt(s): {}",
            self.job_id, self.stage, self.attempts, self.error
        )
    }
}
