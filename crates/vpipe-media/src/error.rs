//! Error types for media operations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use vpipe_models::StageName;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running external tools or publishing outputs.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{program} not found in PATH")]
    ToolNotFound { program: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external process exited non-zero (or was killed by a signal).
    #[error("`{command}` failed with {}{}", exit_label(.exit_code), output_tail(.output))]
    ToolExecution {
        command: String,
        exit_code: Option<i32>,
        /// Combined stdout and stderr
        output: String,
    },

    #[error("`{command}` was cancelled")]
    Cancelled {
        command: String,
        /// Output printed before the cancel
        output: String,
    },

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn exit_label(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn output_tail(output: &str) -> String {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| format!(": {}", line))
        .unwrap_or_default()
}

impl MediaError {
    pub fn tool_not_found(program: impl Into<String>) -> Self {
        Self::ToolNotFound {
            program: program.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Diagnostic key/value pairs for the failure record.
    pub fn diagnostics(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        match self {
            MediaError::ToolNotFound { program } | MediaError::Spawn { program, .. } => {
                details.insert("program".to_string(), program.clone());
            }
            MediaError::ToolExecution {
                command, exit_code, ..
            } => {
                details.insert("command".to_string(), command.clone());
                if let Some(code) = exit_code {
                    details.insert("exit_code".to_string(), code.to_string());
                }
            }
            MediaError::Cancelled { command, .. } => {
                details.insert("command".to_string(), command.clone());
            }
            MediaError::Commit(e) => details.extend(e.diagnostics()),
            MediaError::Probe(e) => {
                details.insert("artifact".to_string(), e.path.display().to_string());
            }
            MediaError::InvalidInput(_) | MediaError::Io(_) | MediaError::Internal(_) => {}
        }
        details
    }
}

/// Atomic publish of a stage output failed.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Temporary file missing: {}", .0.display())]
    MissingTemp(PathBuf),

    #[error("Cannot commit {} to {}: different filesystems", .temp.display(), .target.display())]
    CrossDevice { temp: PathBuf, target: PathBuf },

    #[error("Failed to create directory {}: {source}", .dir.display())]
    CreateParent {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to replace {} with {}: {source}", .target.display(), .temp.display())]
    Replace {
        temp: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CommitError {
    pub fn diagnostics(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        match self {
            CommitError::MissingTemp(temp) => {
                details.insert("temp_path".to_string(), temp.display().to_string());
            }
            CommitError::CrossDevice { temp, target } | CommitError::Replace { temp, target, .. } => {
                details.insert("temp_path".to_string(), temp.display().to_string());
                details.insert("final_path".to_string(), target.display().to_string());
            }
            CommitError::CreateParent { dir, .. } => {
                details.insert("directory".to_string(), dir.display().to_string());
            }
            CommitError::Write { path, .. } => {
                details.insert("temp_path".to_string(), path.display().to_string());
            }
        }
        details
    }
}

/// The duration probe failed. Always recovered by the thumbnail stage.
#[derive(Debug, Error)]
#[error("Duration probe failed for {}: {reason}", .path.display())]
pub struct ProbeError {
    pub path: PathBuf,
    pub reason: String,
}

impl ProbeError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A stage failed; wraps the underlying cause with the stage name.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {cause}")]
pub struct StageError {
    pub stage: StageName,
    #[source]
    pub cause: MediaError,
}

impl StageError {
    pub fn new(stage: StageName, cause: impl Into<MediaError>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }

    pub fn diagnostics(&self) -> BTreeMap<String, String> {
        self.cause.diagnostics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_execution_message_includes_last_line() {
        let err = MediaError::ToolExecution {
            command: "ffmpeg -i a.mp4 out.mp4".to_string(),
            exit_code: Some(1),
            output: "frame=1\na.mp4: No such file or directory\n\n".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code 1"));
        assert!(msg.ends_with("a.mp4: No such file or directory"));
    }

    #[test]
    fn test_signal_exit_label() {
        let err = MediaError::ToolExecution {
            command: "ffmpeg".to_string(),
            exit_code: None,
            output: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_diagnostics_carry_command_and_paths() {
        let err = MediaError::ToolExecution {
            command: "ffmpeg -y x".to_string(),
            exit_code: Some(234),
            output: String::new(),
        };
        let details = err.diagnostics();
        assert_eq!(details["command"], "ffmpeg -y x");
        assert_eq!(details["exit_code"], "234");

        let err = MediaError::from(CommitError::CrossDevice {
            temp: PathBuf::from("/tmp/a"),
            target: PathBuf::from("/mnt/b"),
        });
        let details = err.diagnostics();
        assert_eq!(details["temp_path"], "/tmp/a");
        assert_eq!(details["final_path"], "/mnt/b");
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::new(StageName::Merge, MediaError::invalid_input("need 2 inputs"));
        assert_eq!(err.to_string(), "merge stage failed: Invalid input: need 2 inputs");
    }
}
