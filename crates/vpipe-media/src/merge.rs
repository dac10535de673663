//! Merge stage: normalize every input, then concatenate without re-encoding.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use vpipe_models::encoding::{
    NORMALIZE_AUDIO_CHANNELS, NORMALIZE_FPS, NORMALIZE_SAMPLE_RATE,
};
use vpipe_models::layout::TEMP_DIR;
use vpipe_models::{EncodingConfig, StageName, MAX_INPUTS, MIN_INPUTS};

use crate::command::{ToolCommand, ToolRunner};
use crate::commit::{commit, temp_path_for};
use crate::error::{MediaError, MediaResult, StageError};
use crate::filters::{concat_manifest, normalize_filter};

/// Manifest file name inside the job's temp directory.
pub const MANIFEST_FILE: &str = "list.txt";

/// Normalized intermediate for the input at `index` (1-based).
pub fn normalized_path(temp_dir: &Path, index: usize) -> PathBuf {
    temp_dir.join(format!("n{:02}.mp4", index))
}

/// Re-encode one input to the common frame size, frame rate and audio format.
pub fn normalize_command(input: &Path, output: &Path, encoding: &EncodingConfig) -> ToolCommand {
    ToolCommand::ffmpeg()
        .input(input)
        .video_filter(normalize_filter())
        .args(["-r".to_string(), NORMALIZE_FPS.to_string()])
        .video_codec(&encoding.codec)
        .preset(&encoding.preset)
        .crf(encoding.crf)
        .audio_codec(&encoding.audio_codec)
        .args([
            "-ar".to_string(),
            NORMALIZE_SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            NORMALIZE_AUDIO_CHANNELS.to_string(),
        ])
        .path(output)
}

/// Stream-copy the files listed in `manifest` into `output`.
pub fn concat_command(manifest: &Path, output: &Path) -> ToolCommand {
    ToolCommand::ffmpeg()
        .args(["-f", "concat", "-safe", "0"])
        .input(manifest)
        .args(["-c", "copy"])
        .path(output)
}

/// Merge `inputs` (in order) into `output`.
///
/// Intermediates are written under `<output dir>/temp/` with fixed names, so a
/// re-run after a crash overwrites them instead of accumulating state. They are
/// left in place on failure for diagnosis.
pub async fn merge(
    runner: &dyn ToolRunner,
    inputs: &[PathBuf],
    output: &Path,
    encoding: &EncodingConfig,
) -> Result<PathBuf, StageError> {
    merge_inputs(runner, inputs, output, encoding)
        .await
        .map_err(|e| StageError::new(StageName::Merge, e))
}

async fn merge_inputs(
    runner: &dyn ToolRunner,
    inputs: &[PathBuf],
    output: &Path,
    encoding: &EncodingConfig,
) -> MediaResult<PathBuf> {
    if !(MIN_INPUTS..=MAX_INPUTS).contains(&inputs.len()) {
        return Err(MediaError::invalid_input(format!(
            "expected {}..={} inputs, got {}",
            MIN_INPUTS,
            MAX_INPUTS,
            inputs.len()
        )));
    }
    if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
        return Err(MediaError::invalid_input(format!(
            "input not found: {}",
            missing.display()
        )));
    }

    let job_dir = output
        .parent()
        .ok_or_else(|| MediaError::invalid_input("merge output has no parent directory"))?;
    let temp_dir = job_dir.join(TEMP_DIR);
    fs::create_dir_all(&temp_dir).await?;
    // The concat demuxer resolves relative entries against the manifest's own
    // directory, so every listed path must be absolute.
    let temp_dir = fs::canonicalize(&temp_dir).await?;

    info!(inputs = inputs.len(), output = %output.display(), "Merging inputs");

    let mut normalized = Vec::with_capacity(inputs.len());
    for (i, src) in inputs.iter().enumerate() {
        let norm = normalized_path(&temp_dir, i + 1);
        debug!(input = %src.display(), normalized = %norm.display(), "Normalizing input");
        runner.run(&normalize_command(src, &norm, encoding)).await?;
        normalized.push(norm);
    }

    let manifest = temp_dir.join(MANIFEST_FILE);
    fs::write(&manifest, concat_manifest(&normalized)).await?;

    let merged_temp = temp_path_for(output);
    runner.run(&concat_command(&manifest, &merged_temp)).await?;
    commit(&merged_temp, output).await?;

    info!(output = %output.display(), "Merge committed");
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes a deterministic file at the output path of every ffmpeg call.
    #[derive(Default)]
    struct FakeFfmpeg {
        calls: Mutex<Vec<ToolCommand>>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl ToolRunner for FakeFfmpeg {
        async fn run(&self, cmd: &ToolCommand) -> MediaResult<String> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(cmd.clone());
                calls.len()
            };
            if self.fail_on_call == Some(call) {
                return Err(MediaError::ToolExecution {
                    command: cmd.to_string(),
                    exit_code: Some(1),
                    output: "Invalid data found when processing input".to_string(),
                });
            }
            let out = cmd.last_arg().unwrap();
            std::fs::write(out, format!("out of {}", cmd.value_of("-i").unwrap())).unwrap();
            Ok(String::new())
        }
    }

    fn make_inputs(dir: &Path, n: usize) -> Vec<PathBuf> {
        (1..=n)
            .map(|i| {
                let p = dir.join(format!("uploads/{:02}-clip.mp4", i));
                std::fs::create_dir_all(p.parent().unwrap()).unwrap();
                std::fs::write(&p, format!("clip {i}")).unwrap();
                p
            })
            .collect()
    }

    #[tokio::test]
    async fn test_merge_normalizes_in_order_then_concats() {
        let dir = TempDir::new().unwrap();
        let inputs = make_inputs(dir.path(), 3);
        let output = dir.path().join("merged.mp4");
        let runner = FakeFfmpeg::default();

        let result = merge(&runner, &inputs, &output, &EncodingConfig::default()).await.unwrap();
        assert_eq!(result, output);
        assert!(output.exists());
        assert!(!temp_path_for(&output).exists());

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        for (i, call) in calls.iter().take(3).enumerate() {
            assert_eq!(call.value_of("-i"), Some(inputs[i].to_string_lossy().as_ref()));
            assert_eq!(call.value_of("-r"), Some("30"));
        }
        assert_eq!(calls[3].value_of("-f"), Some("concat"));
        assert_eq!(calls[3].value_of("-c"), Some("copy"));

        let manifest = std::fs::read_to_string(dir.path().join("temp/list.txt")).unwrap();
        let listed: Vec<_> = manifest.lines().collect();
        assert_eq!(listed.len(), 3);
        assert!(listed[0].ends_with("n01.mp4'"));
        assert!(listed[2].ends_with("n03.mp4'"));
    }

    #[tokio::test]
    async fn test_failed_normalization_keeps_previous_intermediates() {
        let dir = TempDir::new().unwrap();
        let inputs = make_inputs(dir.path(), 3);
        let output = dir.path().join("merged.mp4");
        let runner = FakeFfmpeg {
            fail_on_call: Some(2),
            ..Default::default()
        };

        let err = merge(&runner, &inputs, &output, &EncodingConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage, StageName::Merge);
        assert!(matches!(err.cause, MediaError::ToolExecution { .. }));
        assert!(!output.exists());
        assert!(normalized_path(&dir.path().join("temp"), 1).exists());
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rerun_produces_identical_output() {
        let dir = TempDir::new().unwrap();
        let inputs = make_inputs(dir.path(), 2);
        let output = dir.path().join("merged.mp4");
        let runner = FakeFfmpeg::default();

        merge(&runner, &inputs, &output, &EncodingConfig::default()).await.unwrap();
        let first = std::fs::read(&output).unwrap();
        let first_manifest = std::fs::read(dir.path().join("temp/list.txt")).unwrap();

        merge(&runner, &inputs, &output, &EncodingConfig::default()).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), first);
        assert_eq!(std::fs::read(dir.path().join("temp/list.txt")).unwrap(), first_manifest);
    }

    #[tokio::test]
    async fn test_manifest_is_absolute_for_relative_job_dir() {
        let cwd = std::env::current_dir().unwrap();
        let dir = TempDir::new_in(&cwd).unwrap();
        let job_dir = dir.path().strip_prefix(&cwd).unwrap().to_path_buf();
        assert!(job_dir.is_relative());

        let inputs = make_inputs(&job_dir, 2);
        let output = job_dir.join("merged.mp4");
        let runner = FakeFfmpeg::default();
        merge(&runner, &inputs, &output, &EncodingConfig::default()).await.unwrap();

        let manifest = std::fs::read_to_string(job_dir.join("temp/list.txt")).unwrap();
        for line in manifest.lines() {
            let listed = line.trim_start_matches("file '").trim_end_matches('\'');
            assert!(Path::new(listed).is_absolute(), "relative entry: {line}");
            assert!(Path::new(listed).exists());
        }
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_input_count_and_missing_input_are_invalid() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("merged.mp4");
        let runner = FakeFfmpeg::default();

        let one = make_inputs(dir.path(), 1);
        let err = merge(&runner, &one, &output, &EncodingConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err.cause, MediaError::InvalidInput(_)));

        let mut two = make_inputs(dir.path(), 2);
        two[1] = dir.path().join("uploads/ghost.mp4");
        let err = merge(&runner, &two, &output, &EncodingConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err.cause, MediaError::InvalidInput(_)));
        assert!(runner.calls.lock().unwrap().is_empty());
    }
}
