//! Job submission: lay out a new job directory and start its chain.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::info;

use vpipe_models::{JobId, JobLayout, ModelError, MAX_INPUTS, MIN_INPUTS};
use vpipe_queue::StageInvocation;

use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::Pipeline;

/// A job accepted by the pipeline.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub job_id: JobId,
    pub layout: JobLayout,
    pub invocation: StageInvocation,
}

/// Copies source videos into a fresh job tree and submits the chain.
pub struct JobSubmitter {
    videos_dir: PathBuf,
    overlay: PathBuf,
    pipeline: Arc<Pipeline>,
}

impl JobSubmitter {
    pub fn new(
        videos_dir: impl Into<PathBuf>,
        overlay: impl Into<PathBuf>,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            videos_dir: videos_dir.into(),
            overlay: overlay.into(),
            pipeline,
        }
    }

    /// Submit `sources` (in merge order) as a new job.
    ///
    /// Sources are copied to `uploads/NN-<basename>` so the job never depends
    /// on the caller's files staying in place.
    pub async fn submit(&self, sources: &[PathBuf]) -> WorkerResult<SubmittedJob> {
        if !(MIN_INPUTS..=MAX_INPUTS).contains(&sources.len()) {
            return Err(ModelError::InputCount {
                got: sources.len(),
                min: MIN_INPUTS,
                max: MAX_INPUTS,
            }
            .into());
        }

        // Chain paths end up in broker payloads read by other processes.
        fs::create_dir_all(&self.videos_dir).await?;
        let videos_dir = fs::canonicalize(&self.videos_dir).await?;
        let overlay = std::path::absolute(&self.overlay)?;

        let job_id = JobId::new();
        let layout = JobLayout::new(&videos_dir, &job_id);
        fs::create_dir_all(layout.uploads_dir()).await?;

        let mut inputs = Vec::with_capacity(sources.len());
        for (i, source) in sources.iter().enumerate() {
            let target = layout.upload_path(i + 1, &file_name(source)?);
            fs::copy(source, &target).await.map_err(|e| {
                WorkerError::invalid_invocation(format!(
                    "cannot copy {}: {}",
                    source.display(),
                    e
                ))
            })?;
            inputs.push(target);
        }

        let chain = layout.chain(inputs, overlay);
        let invocation = self.pipeline.submit(job_id.clone(), chain).await?;

        info!(job_id = %job_id, root = %layout.root().display(), "Job directory created");
        Ok(SubmittedJob {
            job_id,
            layout,
            invocation,
        })
    }
}

fn file_name(path: &Path) -> WorkerResult<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            WorkerError::invalid_invocation(format!("not a file path: {}", path.display()))
        })
}
