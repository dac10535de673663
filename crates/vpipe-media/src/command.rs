//! External tool command builder and runners.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

/// A program and its argument vector. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    /// Create a command for an arbitrary program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// FFmpeg with overwrite, no banner and error-only logging.
    pub fn ffmpeg() -> Self {
        Self::new(FFMPEG).args(["-y", "-hide_banner", "-loglevel", "error"])
    }

    /// FFprobe with error-only logging.
    pub fn ffprobe() -> Self {
        Self::new(FFPROBE).args(["-v", "error"])
    }

    /// Add one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a path argument.
    pub fn path(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.arg(path)
    }

    /// Add an input file (`-i <path>`).
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.arg("-i").path(path)
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.arg("-filter_complex").arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.arg("-preset").arg(preset)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.arg("-crf").arg(crf.to_string())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Whether any argument equals `arg`.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// The argument following the first occurrence of `flag`.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// The last argument, which is the output file for ffmpeg invocations.
    pub fn last_arg(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

impl fmt::Display for ToolCommand {
    /// Shell-like rendering for logs and diagnostics only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || "'\"$;&|()".contains(c)) {
                write!(f, " '{}'", arg.replace('\'', "'\\''"))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Shared buffer a running tool streams its combined output into.
///
/// The caller keeps a handle, so whatever was printed survives the call being
/// cancelled or dropped.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    buf: Arc<Mutex<String>>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text, terminating it with a newline if it lacks one.
    pub fn append(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Ok(mut buf) = self.buf.lock() {
            buf.push_str(text);
            if !text.ends_with('\n') {
                buf.push('\n');
            }
        }
    }

    /// Everything captured so far.
    pub fn contents(&self) -> String {
        self.buf.lock().map(|buf| buf.clone()).unwrap_or_default()
    }
}

/// Runs an external tool to completion and returns its combined output.
///
/// Implementations must return `MediaError::ToolExecution` with the exit code
/// and full captured output when the process exits non-zero.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, cmd: &ToolCommand) -> MediaResult<String>;

    /// Like `run`, but output also lands in `capture`.
    ///
    /// The default copies the output in once the call returns. Runners that
    /// can stream should override it so partial output outlives a dropped call.
    async fn run_captured(&self, cmd: &ToolCommand, capture: &OutputCapture) -> MediaResult<String> {
        let result = self.run(cmd).await;
        match &result {
            Ok(output) | Err(MediaError::ToolExecution { output, .. }) => capture.append(output),
            Err(_) => {}
        }
        result
    }
}

/// Runner that spawns real processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, cmd: &ToolCommand) -> MediaResult<String> {
        self.run_captured(cmd, &OutputCapture::new()).await
    }

    async fn run_captured(&self, cmd: &ToolCommand, capture: &OutputCapture) -> MediaResult<String> {
        which::which(cmd.program()).map_err(|_| MediaError::tool_not_found(cmd.program()))?;

        debug!(command = %cmd, "Running external tool");
        let started = Instant::now();

        let mut child = Command::new(cmd.program())
            .args(cmd.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MediaError::Spawn {
                program: cmd.program().to_string(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;

        // Both streams land in one buffer in arrival order.
        let stdout_task = tokio::spawn(pump_lines(stdout, capture.clone()));
        let stderr_task = tokio::spawn(pump_lines(stderr, capture.clone()));

        let status = child.wait().await;
        let _ = stdout_task.await;
        let _ = stderr_task.await;
        let status = status?;

        let output = capture.contents();

        metrics::histogram!("vpipe_tool_duration_seconds", "program" => cmd.program().to_string())
            .record(started.elapsed().as_secs_f64());

        if status.success() {
            Ok(output)
        } else {
            Err(MediaError::ToolExecution {
                command: cmd.to_string(),
                exit_code: status.code(),
                output,
            })
        }
    }
}

/// Copy lines from a child stream into the shared capture buffer.
async fn pump_lines<R>(reader: R, sink: OutputCapture)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => sink.append(&String::from_utf8_lossy(&buf)),
        }
    }
}

/// Wraps a runner so in-flight tool invocations stop when a cancel flag flips.
///
/// The inner future is dropped on cancellation; `ProcessRunner` children are
/// spawned with `kill_on_drop`, so the external process is killed with it.
/// Output printed before the cancel is returned in `MediaError::Cancelled`.
pub struct CancellableRunner<'a> {
    inner: &'a dyn ToolRunner,
    cancel_rx: watch::Receiver<bool>,
}

impl<'a> CancellableRunner<'a> {
    pub fn new(inner: &'a dyn ToolRunner, cancel_rx: watch::Receiver<bool>) -> Self {
        Self { inner, cancel_rx }
    }
}

#[async_trait]
impl ToolRunner for CancellableRunner<'_> {
    async fn run(&self, cmd: &ToolCommand) -> MediaResult<String> {
        self.run_captured(cmd, &OutputCapture::new()).await
    }

    async fn run_captured(&self, cmd: &ToolCommand, capture: &OutputCapture) -> MediaResult<String> {
        let mut cancel_rx = self.cancel_rx.clone();
        if *cancel_rx.borrow_and_update() {
            return Err(MediaError::Cancelled {
                command: cmd.to_string(),
                output: String::new(),
            });
        }

        tokio::select! {
            result = self.inner.run_captured(cmd, capture) => result,
            _ = wait_for_cancel(&mut cancel_rx) => {
                info!(command = %cmd, "Tool invocation cancelled, killing process");
                Err(MediaError::Cancelled {
                    command: cmd.to_string(),
                    output: capture.contents(),
                })
            }
        }
    }
}

/// Resolves once the flag is set. Never resolves if the sender is gone.
async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            warn!("Cancel signal sender dropped");
            std::future::pending::<()>().await;
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<std::path::PathBuf> {
    which::which(FFMPEG).map_err(|_| MediaError::tool_not_found(FFMPEG))
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<std::path::PathBuf> {
    which::which(FFPROBE).map_err(|_| MediaError::tool_not_found(FFPROBE))
}
