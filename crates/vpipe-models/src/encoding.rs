//! Encoding settings for the external tool invocations.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "veryfast";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 23;

/// Normalized frame size for merge inputs (letterboxed)
pub const NORMALIZE_WIDTH: u32 = 1280;
pub const NORMALIZE_HEIGHT: u32 = 720;
pub const NORMALIZE_FPS: u32 = 30;
pub const NORMALIZE_SAMPLE_RATE: u32 = 44_100;
pub const NORMALIZE_AUDIO_CHANNELS: u32 = 2;

/// Watermark overlay settings
pub const WATERMARK_WIDTH: u32 = 200;
pub const WATERMARK_OPACITY: f32 = 0.35;
pub const WATERMARK_MARGIN: u32 = 10;
/// Overlay is visible only during the first seconds of the video.
pub const WATERMARK_VISIBLE_SECS: u32 = 3;

/// Videos at least this long get a start-relative thumbnail.
pub const THUMBNAIL_MIN_DURATION_SECS: f64 = 5.0;
/// Start-relative thumbnail offset.
pub const THUMBNAIL_START_OFFSET_SECS: u32 = 5;
/// End-relative thumbnail offset (seconds before the end).
pub const THUMBNAIL_END_OFFSET_SECS: u32 = 1;
/// JPEG/PNG quality scale passed as `-q:v`.
pub const THUMBNAIL_QUALITY: u32 = 2;

/// Video encoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset (e.g., "veryfast", "medium")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Audio codec used when audio is re-encoded
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_codec: default_audio_codec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EncodingConfig::default();
        assert_eq!(config.codec, "libx264");
        assert_eq!(config.preset, "veryfast");
        assert_eq!(config.crf, 23);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EncodingConfig = serde_json::from_str(r#"{"crf": 28}"#).unwrap();
        assert_eq!(config.crf, 28);
        assert_eq!(config.audio_codec, "aac");
    }
}
