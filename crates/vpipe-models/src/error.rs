//! Model validation errors.

use thiserror::Error;

use crate::job::{JobEvent, JobState};

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Expected between {min} and {max} input files, got {got}")]
    InputCount { got: usize, min: usize, max: usize },

    #[error("Invalid path for {field}: {reason}")]
    InvalidPath { field: &'static str, reason: String },

    #[error("Illegal transition from {from} on {event}")]
    IllegalTransition { from: JobState, event: JobEvent },
}

impl ModelError {
    pub fn invalid_path(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            field,
            reason: reason.into(),
        }
    }
}
