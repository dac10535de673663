//! Job directory layout.
//!
//! The job directory is the only persistence layer. Which canonical files
//! exist, and whether `error.json` exists, is the authoritative job status:
//!
//! ```text
//! <videos_dir>/<job_id>/
//!     uploads/            original inputs, immutable after submission
//!     temp/               per-stage scratch, disposable
//!     logs/               <stage>-attempt<N>.log, captured tool output
//!     merged.mp4          merge output
//!     final.mp4           watermark output
//!     thumb.png           thumbnail output
//!     error.json          present iff the job failed
//! ```

use std::path::{Path, PathBuf};

use crate::chain::ChainSpec;
use crate::job::{JobId, StageName};

pub const UPLOADS_DIR: &str = "uploads";
pub const TEMP_DIR: &str = "temp";
pub const LOGS_DIR: &str = "logs";
pub const MERGED_FILE: &str = "merged.mp4";
pub const FINAL_FILE: &str = "final.mp4";
pub const THUMBNAIL_FILE: &str = "thumb.png";
pub const ERROR_FILE: &str = "error.json";

/// Path computations for one job directory. Performs no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLayout {
    root: PathBuf,
}

impl JobLayout {
    /// Layout for a job under the videos root.
    pub fn new(videos_dir: impl AsRef<Path>, job_id: &JobId) -> Self {
        Self {
            root: videos_dir.as_ref().join(job_id.as_str()),
        }
    }

    /// Layout for an existing job directory.
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn merged_path(&self) -> PathBuf {
        self.root.join(MERGED_FILE)
    }

    pub fn final_path(&self) -> PathBuf {
        self.root.join(FINAL_FILE)
    }

    pub fn thumbnail_path(&self) -> PathBuf {
        self.root.join(THUMBNAIL_FILE)
    }

    pub fn error_path(&self) -> PathBuf {
        self.root.join(ERROR_FILE)
    }

    /// Where an uploaded input is stored: `uploads/NN-<name>` (1-based).
    pub fn upload_path(&self, index: usize, file_name: &str) -> PathBuf {
        self.uploads_dir().join(format!("{:02}-{}", index, file_name))
    }

    /// Captured tool output of one stage attempt (1-based).
    pub fn log_path(&self, stage: StageName, attempt: u32) -> PathBuf {
        self.logs_dir().join(format!("{}-attempt{}.log", stage, attempt))
    }

    /// Chain paths for this job with the given inputs and overlay image.
    pub fn chain(&self, inputs: Vec<PathBuf>, overlay: impl Into<PathBuf>) -> ChainSpec {
        ChainSpec {
            inputs,
            merged_output: self.merged_path(),
            overlay: overlay.into(),
            final_output: self.final_path(),
            thumbnail_output: self.thumbnail_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = JobLayout::new("/srv/videos", &JobId::from_string("ab12cd34"));
        assert_eq!(layout.root(), Path::new("/srv/videos/ab12cd34"));
        assert_eq!(layout.merged_path(), Path::new("/srv/videos/ab12cd34/merged.mp4"));
        assert_eq!(layout.error_path(), Path::new("/srv/videos/ab12cd34/error.json"));
        assert_eq!(
            layout.upload_path(3, "clip.mov"),
            Path::new("/srv/videos/ab12cd34/uploads/03-clip.mov")
        );
        assert_eq!(
            layout.log_path(StageName::Watermark, 2),
            Path::new("/srv/videos/ab12cd34/logs/watermark-attempt2.log")
        );
    }

    #[test]
    fn test_chain_uses_canonical_outputs() {
        let layout = JobLayout::from_root("/tmp/job");
        let chain = layout.chain(vec![PathBuf::from("a"), PathBuf::from("b")], "/logo.png");
        assert_eq!(chain.final_output, layout.final_path());
        assert_eq!(chain.thumbnail_output, layout.thumbnail_path());
        assert_eq!(chain.job_dir(), Some(layout.root()));
    }
}
