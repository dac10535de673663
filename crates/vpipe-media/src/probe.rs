//! FFprobe duration lookup.

use std::path::Path;

use crate::command::{ToolCommand, ToolRunner};
use crate::error::ProbeError;

/// Build the ffprobe invocation that prints only the container duration.
pub fn duration_command(path: &Path) -> ToolCommand {
    ToolCommand::ffprobe()
        .args([
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .path(path)
}

/// Probe a video's duration in seconds.
pub async fn probe_duration(runner: &dyn ToolRunner, path: &Path) -> Result<f64, ProbeError> {
    let output = runner
        .run(&duration_command(path))
        .await
        .map_err(|e| ProbeError::new(path, e.to_string()))?;

    parse_duration(&output)
        .ok_or_else(|| ProbeError::new(path, format!("unparsable duration {:?}", output.trim())))
}

/// Parse ffprobe's bare duration output (e.g. "12.345000").
fn parse_duration(output: &str) -> Option<f64> {
    let value: f64 = output.lines().map(str::trim).find(|l| !l.is_empty())?.parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}
