//! The paths a submitted stage chain operates on.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ModelError, ModelResult};
use crate::job::StageName;

/// Minimum number of input videos per job.
pub const MIN_INPUTS: usize = 2;
/// Maximum number of input videos per job.
pub const MAX_INPUTS: usize = 5;

/// Everything the submission collaborator hands to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChainSpec {
    /// Input videos in merge order
    pub inputs: Vec<PathBuf>,
    /// Canonical merge output (`merged.mp4`)
    pub merged_output: PathBuf,
    /// Overlay image, shared read-only across jobs
    pub overlay: PathBuf,
    /// Canonical watermarked output (`final.mp4`)
    pub final_output: PathBuf,
    /// Canonical thumbnail (`thumb.png`)
    pub thumbnail_output: PathBuf,
}

impl ChainSpec {
    /// Check input count and output path shape.
    pub fn validate(&self) -> ModelResult<()> {
        let got = self.inputs.len();
        if !(MIN_INPUTS..=MAX_INPUTS).contains(&got) {
            return Err(ModelError::InputCount {
                got,
                min: MIN_INPUTS,
                max: MAX_INPUTS,
            });
        }

        for (field, path) in [
            ("merged_output", &self.merged_output),
            ("final_output", &self.final_output),
            ("thumbnail_output", &self.thumbnail_output),
        ] {
            if path.file_name().is_none() {
                return Err(ModelError::invalid_path(field, "missing file name"));
            }
            match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => {}
                _ => return Err(ModelError::invalid_path(field, "missing parent directory")),
            }
        }

        if self.overlay.as_os_str().is_empty() {
            return Err(ModelError::invalid_path("overlay", "empty path"));
        }

        Ok(())
    }

    /// Canonical output path of a stage.
    pub fn output_of(&self, stage: StageName) -> &Path {
        match stage {
            StageName::Merge => &self.merged_output,
            StageName::Watermark => &self.final_output,
            StageName::Thumbnail => &self.thumbnail_output,
        }
    }

    /// Job root directory (parent of the merged output).
    pub fn job_dir(&self) -> Option<&Path> {
        self.merged_output.parent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> ChainSpec {
        ChainSpec {
            inputs: (1..=n).map(|i| PathBuf::from(format!("/v/job/uploads/{i:02}.mp4"))).collect(),
            merged_output: PathBuf::from("/v/job/merged.mp4"),
            overlay: PathBuf::from("/app/logo.png"),
            final_output: PathBuf::from("/v/job/final.mp4"),
            thumbnail_output: PathBuf::from("/v/job/thumb.png"),
        }
    }

    #[test]
    fn test_input_count_bounds() {
        assert!(matches!(chain(1).validate(), Err(ModelError::InputCount { got: 1, .. })));
        for n in MIN_INPUTS..=MAX_INPUTS {
            assert!(chain(n).validate().is_ok(), "{n} inputs should be accepted");
        }
        assert!(matches!(chain(6).validate(), Err(ModelError::InputCount { got: 6, .. })));
    }

    #[test]
    fn test_output_without_parent_rejected() {
        let mut spec = chain(2);
        spec.final_output = PathBuf::from("final.mp4");
        assert!(matches!(
            spec.validate(),
            Err(ModelError::InvalidPath { field: "final_output", .. })
        ));
    }

    #[test]
    fn test_output_of_stage() {
        let spec = chain(3);
        assert_eq!(spec.output_of(StageName::Merge), Path::new("/v/job/merged.mp4"));
        assert_eq!(spec.output_of(StageName::Thumbnail), Path::new("/v/job/thumb.png"));
        assert_eq!(spec.job_dir(), Some(Path::new("/v/job")));
    }
}
