//! Stage invocation payload carried by the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vpipe_models::{ChainSpec, JobId, StageName};

/// Request to run one stage of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInvocation {
    /// Job this stage belongs to
    pub job_id: JobId,
    /// Stage to run
    pub stage: StageName,
    /// Paths for the whole chain
    pub chain: ChainSpec,
    /// Committed output of the previous stage; `None` for the first stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<PathBuf>,
    /// When the invocation was created
    pub created_at: DateTime<Utc>,
}

impl StageInvocation {
    /// First stage of a freshly submitted chain.
    pub fn first(job_id: JobId, chain: ChainSpec) -> Self {
        Self {
            job_id,
            stage: StageName::Merge,
            chain,
            input: None,
            created_at: Utc::now(),
        }
    }

    /// The invocation for the following stage, fed by this stage's output.
    ///
    /// Returns `None` after the last stage.
    pub fn successor(&self) -> Option<Self> {
        let stage = self.stage.next()?;
        Some(Self {
            job_id: self.job_id.clone(),
            stage,
            chain: self.chain.clone(),
            input: Some(self.output().to_path_buf()),
            created_at: Utc::now(),
        })
    }

    /// Canonical output path of this stage.
    pub fn output(&self) -> &Path {
        self.chain.output_of(self.stage)
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("stage:{}:{}", self.job_id, self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpipe_models::JobLayout;

    fn invocation() -> StageInvocation {
        let job_id = JobId::from_string("1a2b3c4d");
        let layout = JobLayout::new("/videos", &job_id);
        let chain = layout.chain(
            vec![layout.upload_path(1, "a.mp4"), layout.upload_path(2, "b.mp4")],
            "/app/logo.png",
        );
        StageInvocation::first(job_id, chain)
    }

    #[test]
    fn test_successor_chain_feeds_outputs_forward() {
        let merge = invocation();
        assert_eq!(merge.stage, StageName::Merge);
        assert!(merge.input.is_none());

        let watermark = merge.successor().unwrap();
        assert_eq!(watermark.stage, StageName::Watermark);
        assert_eq!(watermark.input.as_deref(), Some(Path::new("/videos/1a2b3c4d/merged.mp4")));

        let thumbnail = watermark.successor().unwrap();
        assert_eq!(thumbnail.stage, StageName::Thumbnail);
        assert_eq!(thumbnail.input.as_deref(), Some(Path::new("/videos/1a2b3c4d/final.mp4")));

        assert!(thumbnail.successor().is_none());
    }

    #[test]
    fn test_idempotency_key_is_per_job_and_stage() {
        let merge = invocation();
        assert_eq!(merge.idempotency_key(), "stage:1a2b3c4d:merge");
        assert_eq!(
            merge.successor().unwrap().idempotency_key(),
            "stage:1a2b3c4d:watermark"
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let job = invocation();
        let json = serde_json::to_string(&job).expect("serialize StageInvocation");
        assert!(json.contains("\"stage\":\"merge\""));
        assert!(!json.contains("\"input\""));
        let decoded: StageInvocation = serde_json::from_str(&json).expect("deserialize StageInvocation");
        assert_eq!(decoded, job);
    }
}
