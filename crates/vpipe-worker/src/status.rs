//! Job state as observed from the job directory.
//!
//! The filesystem is the source of truth: canonical outputs only appear
//! through an atomic commit, so their presence marks a finished stage.

use vpipe_models::{JobLayout, JobState, StageName};

/// Derive a job's state from what its directory contains.
pub fn observe_state(layout: &JobLayout) -> JobState {
    if layout.error_path().is_file() {
        JobState::Failed
    } else if layout.thumbnail_path().is_file() {
        JobState::Completed
    } else if layout.final_path().is_file() {
        JobState::Thumbnailing
    } else if layout.merged_path().is_file() {
        JobState::Watermarking
    } else if layout.log_path(StageName::Merge, 1).is_file() {
        JobState::Merging
    } else {
        JobState::Queued
    }
}

/// Whether a job directory exists at all.
pub fn job_exists(layout: &JobLayout) -> bool {
    layout.root().is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;
    use vpipe_models::JobId;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_state_follows_committed_outputs() {
        let dir = TempDir::new().unwrap();
        let layout = JobLayout::new(dir.path(), &JobId::from_string("abcd1234"));
        assert!(!job_exists(&layout));

        touch(&layout.upload_path(1, "a.mp4"));
        assert!(job_exists(&layout));
        assert_eq!(observe_state(&layout), JobState::Queued);

        touch(&layout.log_path(StageName::Merge, 1));
        assert_eq!(observe_state(&layout), JobState::Merging);

        touch(&layout.merged_path());
        assert_eq!(observe_state(&layout), JobState::Watermarking);

        touch(&layout.final_path());
        assert_eq!(observe_state(&layout), JobState::Thumbnailing);

        touch(&layout.thumbnail_path());
        assert_eq!(observe_state(&layout), JobState::Completed);
    }

    #[test]
    fn test_error_record_wins() {
        let dir = TempDir::new().unwrap();
        let layout = JobLayout::new(dir.path(), &JobId::from_string("abcd1234"));
        touch(&layout.merged_path());
        touch(&layout.error_path());
        assert_eq!(observe_state(&layout), JobState::Failed);
    }

    #[test]
    fn test_temp_files_do_not_count() {
        let dir = TempDir::new().unwrap();
        let layout = JobLayout::new(dir.path(), &JobId::from_string("abcd1234"));
        touch(&layout.root().join("merged.tmp.mp4"));
        assert_eq!(observe_state(&layout), JobState::Queued);
    }
}
