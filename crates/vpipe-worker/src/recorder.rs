//! Per-job attempt logs and the failure record.

use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use vpipe_media::{commit_bytes, Transcript};
use vpipe_models::{ChainSpec, ErrorRecord, JobLayout, StageName};

use crate::error::{WorkerError, WorkerResult};

/// Writes into `logs/` and `error.json` of one job directory.
#[derive(Debug, Clone)]
pub struct JobRecorder {
    layout: JobLayout,
}

impl JobRecorder {
    pub fn new(layout: JobLayout) -> Self {
        Self { layout }
    }

    /// Recorder for the job directory a chain writes into.
    pub fn for_chain(chain: &ChainSpec) -> WorkerResult<Self> {
        let root = chain
            .job_dir()
            .ok_or_else(|| WorkerError::invalid_invocation("chain has no job directory"))?;
        Ok(Self::new(JobLayout::from_root(root)))
    }

    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    /// Persist the tool transcript of one attempt.
    ///
    /// Nothing is written when no tool ran. Returns the log path otherwise.
    pub async fn record_attempt(
        &self,
        stage: StageName,
        attempt: u32,
        transcript: &Transcript,
    ) -> WorkerResult<Option<PathBuf>> {
        if transcript.is_empty() {
            return Ok(None);
        }
        let path = self.layout.log_path(stage, attempt);
        fs::create_dir_all(self.layout.logs_dir()).await?;
        fs::write(&path, transcript.render()).await?;
        debug!(log = %path.display(), "Recorded attempt log");
        Ok(Some(path))
    }

    /// Write `error.json` atomically. A later failure replaces an earlier one.
    pub async fn record_failure(&self, record: &ErrorRecord) -> WorkerResult<PathBuf> {
        let path = self.layout.error_path();
        let body = serde_json::to_vec_pretty(record)?;
        commit_bytes(&path, &body).await?;
        Ok(path)
    }

    /// Read `error.json` back, if the job has failed.
    pub async fn read_failure(&self) -> WorkerResult<Option<ErrorRecord>> {
        match fs::read(self.layout.error_path()).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
