//! FFmpeg filter graphs and the concat manifest.

use std::path::Path;

use vpipe_models::encoding::{NORMALIZE_HEIGHT, NORMALIZE_WIDTH};

use crate::watermark::WatermarkConfig;

/// Scale into the normalized frame, preserving aspect ratio, and letterbox the rest.
pub fn normalize_filter() -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1",
        w = NORMALIZE_WIDTH,
        h = NORMALIZE_HEIGHT
    )
}

/// Overlay graph: scaled, semi-transparent image pinned bottom-right,
/// enabled only during the configured initial window.
pub fn watermark_filter(config: &WatermarkConfig) -> String {
    format!(
        "[1:v]scale={width}:-1,format=rgba,colorchannelmixer=aa={opacity:.2}[wm];\
         [0:v][wm]overlay=main_w-overlay_w-{x}:main_h-overlay_h-{y}:enable='between(t,0,{secs})'",
        width = config.width,
        opacity = config.opacity,
        x = config.offset_x,
        y = config.offset_y,
        secs = config.visible_secs
    )
}

/// Concat demuxer manifest listing `files` in order.
pub fn concat_manifest<P: AsRef<Path>>(files: &[P]) -> String {
    files
        .iter()
        .map(|p| format!("file '{}'\n", escape_concat_path(p.as_ref())))
        .collect()
}

/// Quote a path for the concat demuxer (single quotes closed, escaped, reopened).
fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").replace('\'', "'\\''")
}
