//! Watermark stage: overlay the logo onto the merged video.
//!
//! The overlay is scaled, made semi-transparent, pinned to the bottom-right
//! corner and visible only for the first few seconds. Video is re-encoded,
//! audio passes through untouched.

use std::path::{Path, PathBuf};
use tracing::info;

use vpipe_models::encoding::{
    WATERMARK_MARGIN, WATERMARK_OPACITY, WATERMARK_VISIBLE_SECS, WATERMARK_WIDTH,
};
use vpipe_models::{EncodingConfig, StageName};

use crate::command::{ToolCommand, ToolRunner};
use crate::commit::{commit, temp_path_for};
use crate::error::{MediaError, MediaResult, StageError};
use crate::filters::watermark_filter;

/// Configuration for the watermark overlay.
///
/// Use the builder methods for non-default placement:
/// ```ignore
/// let config = WatermarkConfig::default()
///     .with_offset(30, 30)
///     .with_opacity(0.5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkConfig {
    /// Overlay width in pixels (height follows aspect ratio)
    pub width: u32,
    /// Horizontal offset from right edge (pixels)
    pub offset_x: u32,
    /// Vertical offset from bottom edge (pixels)
    pub offset_y: u32,
    /// Opacity (0.0 to 1.0)
    pub opacity: f32,
    /// Overlay is shown during `[0, visible_secs]`
    pub visible_secs: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            width: WATERMARK_WIDTH,
            offset_x: WATERMARK_MARGIN,
            offset_y: WATERMARK_MARGIN,
            opacity: WATERMARK_OPACITY,
            visible_secs: WATERMARK_VISIBLE_SECS,
        }
    }
}

impl WatermarkConfig {
    /// Set offset from bottom-right corner.
    pub fn with_offset(mut self, x: u32, y: u32) -> Self {
        self.offset_x = x;
        self.offset_y = y;
        self
    }

    /// Set watermark opacity (0.0 = invisible, 1.0 = fully opaque).
    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    /// Set how long the overlay stays visible.
    pub fn with_visible_secs(mut self, secs: u32) -> Self {
        self.visible_secs = secs;
        self
    }
}

/// Build the overlay invocation writing to `output`.
pub fn watermark_command(
    input: &Path,
    overlay: &Path,
    output: &Path,
    config: &WatermarkConfig,
    encoding: &EncodingConfig,
) -> ToolCommand {
    ToolCommand::ffmpeg()
        .input(input)
        .input(overlay)
        .filter_complex(watermark_filter(config))
        .video_codec(&encoding.codec)
        .preset(&encoding.preset)
        .crf(encoding.crf)
        .audio_codec("copy")
        .args(["-movflags", "+faststart"])
        .path(output)
}

/// Overlay `overlay` onto `input` and commit the result to `output`.
pub async fn watermark(
    runner: &dyn ToolRunner,
    input: &Path,
    overlay: &Path,
    output: &Path,
    config: &WatermarkConfig,
    encoding: &EncodingConfig,
) -> Result<PathBuf, StageError> {
    apply(runner, input, overlay, output, config, encoding)
        .await
        .map_err(|e| StageError::new(StageName::Watermark, e))
}

async fn apply(
    runner: &dyn ToolRunner,
    input: &Path,
    overlay: &Path,
    output: &Path,
    config: &WatermarkConfig,
    encoding: &EncodingConfig,
) -> MediaResult<PathBuf> {
    if !input.is_file() {
        return Err(MediaError::invalid_input(format!(
            "merged video not found: {}",
            input.display()
        )));
    }
    if !overlay.is_file() {
        return Err(MediaError::invalid_input(format!(
            "watermark image not found: {}",
            overlay.display()
        )));
    }

    info!(
        video = %input.display(),
        watermark = %overlay.display(),
        opacity = config.opacity,
        "Applying watermark overlay"
    );

    let temp = temp_path_for(output);
    runner
        .run(&watermark_command(input, overlay, &temp, config, encoding))
        .await?;
    commit(&temp, output).await?;

    info!(output = %output.display(), "Watermark applied");
    Ok(output.to_path_buf())
}
