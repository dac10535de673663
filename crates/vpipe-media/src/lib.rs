//! External tool execution and the media stages of the job pipeline.
//!
//! This crate provides:
//! - Argument-vector command building for ffmpeg/ffprobe (no shell)
//! - A `ToolRunner` seam with a process-backed implementation
//! - Cancellation and transcript capture wrappers around any runner
//! - Atomic commit of stage outputs (write temp sibling, then rename)
//! - The merge, watermark and thumbnail stages

pub mod command;
pub mod commit;
pub mod error;
pub mod filters;
pub mod merge;
pub mod probe;
pub mod thumbnail;
pub mod transcript;
pub mod watermark;

pub use command::{
    check_ffmpeg, check_ffprobe, CancellableRunner, OutputCapture, ProcessRunner, ToolCommand,
    ToolRunner,
};
pub use commit::{commit, commit_bytes, temp_path_for};
pub use error::{CommitError, MediaError, MediaResult, ProbeError, StageError};
pub use merge::merge;
pub use probe::probe_duration;
pub use thumbnail::{thumbnail, ThumbnailOffset};
pub use transcript::{RecordingRunner, Transcript, TranscriptEntry};
pub use watermark::{watermark, WatermarkConfig};
