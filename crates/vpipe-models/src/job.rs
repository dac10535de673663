//! Job identity, stage chain and the job state machine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};

/// Length of a generated job ID in hex characters.
const JOB_ID_LEN: usize = 8;

/// Opaque short identifier for a job.
///
/// Doubles as the name of the job's directory under the videos root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(JOB_ID_LEN);
        Self(id)
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Merge,
    Watermark,
    Thumbnail,
}

impl StageName {
    /// The fixed stage order of every job.
    pub const CHAIN: [StageName; 3] = [StageName::Merge, StageName::Watermark, StageName::Thumbnail];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Merge => "merge",
            StageName::Watermark => "watermark",
            StageName::Thumbnail => "thumbnail",
        }
    }

    /// The stage that consumes this stage's output, if any.
    pub fn next(&self) -> Option<StageName> {
        match self {
            StageName::Merge => Some(StageName::Watermark),
            StageName::Watermark => Some(StageName::Thumbnail),
            StageName::Thumbnail => None,
        }
    }

    /// The job state while this stage is running.
    pub fn running_state(&self) -> JobState {
        match self {
            StageName::Merge => JobState::Merging,
            StageName::Watermark => JobState::Watermarking,
            StageName::Thumbnail => JobState::Thumbnailing,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Chain submitted, merge not started yet
    #[default]
    Queued,
    Merging,
    Watermarking,
    Thumbnailing,
    /// All three canonical outputs committed
    Completed,
    /// A stage exhausted its retries or failed fatally
    Failed,
}

/// Something that happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    StageStarted(StageName),
    StageCommitted(StageName),
    Failed,
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobEvent::StageStarted(stage) => write!(f, "{stage} started"),
            JobEvent::StageCommitted(stage) => write!(f, "{stage} committed"),
            JobEvent::Failed => f.write_str("failure"),
        }
    }
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Merging => "merging",
            JobState::Watermarking => "watermarking",
            JobState::Thumbnailing => "thumbnailing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Apply an event, returning the next state.
    ///
    /// A stage may start again while its own state is current (retry attempts
    /// and broker redelivery); every other repeat is rejected.
    pub fn transition(self, event: JobEvent) -> ModelResult<JobState> {
        let next = match (self, event) {
            (JobState::Queued, JobEvent::StageStarted(StageName::Merge)) => JobState::Merging,
            (state, JobEvent::StageStarted(stage)) if state == stage.running_state() => state,
            (state, JobEvent::StageCommitted(stage)) if state == stage.running_state() => {
                match stage.next() {
                    Some(next) => next.running_state(),
                    None => JobState::Completed,
                }
            }
            (state, JobEvent::Failed) if !state.is_terminal() => JobState::Failed,
            (from, event) => return Err(ModelError::IllegalTransition { from, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
