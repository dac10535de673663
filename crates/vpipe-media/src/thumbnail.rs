//! Thumbnail stage.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use vpipe_models::encoding::{
    THUMBNAIL_END_OFFSET_SECS, THUMBNAIL_MIN_DURATION_SECS, THUMBNAIL_QUALITY,
    THUMBNAIL_START_OFFSET_SECS,
};
use vpipe_models::StageName;

use crate::command::{ToolCommand, ToolRunner};
use crate::commit::{commit, temp_path_for};
use crate::error::{MediaError, MediaResult, StageError};
use crate::probe::probe_duration;

/// Where in the video the frame is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailOffset {
    /// Seconds after the start (`-ss`)
    FromStart(u32),
    /// Seconds before the end (`-sseof`)
    FromEnd(u32),
}

impl ThumbnailOffset {
    /// Pick the seek position for a video of `duration` seconds.
    ///
    /// Short videos, and those whose duration could not be probed (reported
    /// as 0), use an end-relative seek so the frame always exists.
    pub fn for_duration(duration: f64) -> Self {
        if duration >= THUMBNAIL_MIN_DURATION_SECS {
            ThumbnailOffset::FromStart(THUMBNAIL_START_OFFSET_SECS)
        } else {
            ThumbnailOffset::FromEnd(THUMBNAIL_END_OFFSET_SECS)
        }
    }

    fn seek_args(&self) -> [String; 2] {
        match self {
            ThumbnailOffset::FromStart(secs) => ["-ss".to_string(), secs.to_string()],
            ThumbnailOffset::FromEnd(secs) => ["-sseof".to_string(), format!("-{}", secs)],
        }
    }
}

/// Extract a single frame at `offset` into `output`.
pub fn thumbnail_command(input: &Path, output: &Path, offset: ThumbnailOffset) -> ToolCommand {
    ToolCommand::ffmpeg()
        .args(offset.seek_args())
        .input(input)
        .args(["-frames:v".to_string(), "1".to_string()])
        .args(["-q:v".to_string(), THUMBNAIL_QUALITY.to_string()])
        .path(output)
}

/// Extract a still from `input` and commit it to `output`.
pub async fn thumbnail(
    runner: &dyn ToolRunner,
    input: &Path,
    output: &Path,
) -> Result<PathBuf, StageError> {
    extract(runner, input, output)
        .await
        .map_err(|e| StageError::new(StageName::Thumbnail, e))
}

async fn extract(runner: &dyn ToolRunner, input: &Path, output: &Path) -> MediaResult<PathBuf> {
    if !input.is_file() {
        return Err(MediaError::invalid_input(format!(
            "final video not found: {}",
            input.display()
        )));
    }

    let duration = match probe_duration(runner, input).await {
        Ok(duration) => duration,
        Err(e) => {
            warn!(video = %input.display(), error = %e, "Duration probe failed, seeking from end");
            0.0
        }
    };
    let offset = ThumbnailOffset::for_duration(duration);

    info!(video = %input.display(), duration, ?offset, "Extracting thumbnail");

    let temp = temp_path_for(output);
    runner.run(&thumbnail_command(input, &temp, offset)).await?;
    commit(&temp, output).await?;

    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_offset_threshold() {
        assert_eq!(ThumbnailOffset::for_duration(5.0), ThumbnailOffset::FromStart(5));
        assert_eq!(ThumbnailOffset::for_duration(120.0), ThumbnailOffset::FromStart(5));
        assert_eq!(ThumbnailOffset::for_duration(4.99), ThumbnailOffset::FromEnd(1));
        assert_eq!(ThumbnailOffset::for_duration(0.0), ThumbnailOffset::FromEnd(1));
    }

    #[test]
    fn test_command_shape() {
        let cmd = thumbnail_command(
            Path::new("/job/final.mp4"),
            Path::new("/job/thumb.tmp.png"),
            ThumbnailOffset::FromEnd(1),
        );
        assert_eq!(cmd.value_of("-sseof"), Some("-1"));
        assert_eq!(cmd.value_of("-frames:v"), Some("1"));
        assert_eq!(cmd.value_of("-q:v"), Some("2"));
        assert_eq!(cmd.last_arg(), Some("/job/thumb.tmp.png"));
        assert!(!cmd.has_arg("-ss"));
    }

    /// Answers ffprobe with a canned result and writes a frame for ffmpeg.
    struct FakeTools {
        probe: Option<&'static str>,
        calls: Mutex<Vec<ToolCommand>>,
    }

    #[async_trait]
    impl ToolRunner for FakeTools {
        async fn run(&self, cmd: &ToolCommand) -> MediaResult<String> {
            self.calls.lock().unwrap().push(cmd.clone());
            if cmd.program() == "ffprobe" {
                return self.probe.map(str::to_string).ok_or_else(|| MediaError::ToolExecution {
                    command: cmd.to_string(),
                    exit_code: Some(1),
                    output: "Invalid data found when processing input".to_string(),
                });
            }
            std::fs::write(cmd.last_arg().unwrap(), b"png").unwrap();
            Ok(String::new())
        }
    }

    async fn run_with_probe(probe: Option<&'static str>) -> (TempDir, Vec<ToolCommand>) {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("final.mp4");
        let output = dir.path().join("thumb.png");
        std::fs::write(&input, b"video").unwrap();
        let tools = FakeTools {
            probe,
            calls: Mutex::new(Vec::new()),
        };

        thumbnail(&tools, &input, &output).await.unwrap();
        assert!(output.exists());
        assert!(!dir.path().join("thumb.tmp.png").exists());
        let calls = tools.calls.into_inner().unwrap();
        (dir, calls)
    }

    #[tokio::test]
    async fn test_long_video_seeks_from_start() {
        let (_dir, calls) = run_with_probe(Some("42.000000\n")).await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].value_of("-ss"), Some("5"));
    }

    #[tokio::test]
    async fn test_short_video_seeks_from_end() {
        let (_dir, calls) = run_with_probe(Some("2.5\n")).await;
        assert_eq!(calls[1].value_of("-sseof"), Some("-1"));
    }

    #[tokio::test]
    async fn test_probe_failure_falls_back_to_end_seek() {
        let (_dir, calls) = run_with_probe(None).await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].value_of("-sseof"), Some("-1"));
    }
}
