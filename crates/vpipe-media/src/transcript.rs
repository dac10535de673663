//! Capture of every tool invocation made during one stage attempt.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Mutex;

use crate::command::{OutputCapture, ToolCommand, ToolRunner};
use crate::error::{MediaError, MediaResult};

/// One invocation and what it printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub command: String,
    pub output: String,
    /// `None` on success
    pub failure: Option<String>,
}

/// Ordered record of tool invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Log file body: each command line followed verbatim by its output.
    pub fn render(&self) -> String {
        let mut text = String::new();
        for entry in &self.entries {
            let _ = writeln!(text, "$ {}", entry.command);
            text.push_str(&entry.output);
            if !entry.output.is_empty() && !entry.output.ends_with('\n') {
                text.push('\n');
            }
            if let Some(failure) = &entry.failure {
                let _ = writeln!(text, "# {}", failure);
            }
        }
        text
    }
}

/// Outcome of one recorded invocation.
#[derive(Debug, Clone)]
enum SlotState {
    /// Still running, or dropped before it returned
    Running,
    Finished { failure: Option<String> },
    /// Nothing ran (e.g. binary missing)
    Discarded,
}

#[derive(Debug, Clone)]
struct Slot {
    command: String,
    capture: OutputCapture,
    state: SlotState,
}

/// Runner wrapper that appends every invocation to a transcript.
///
/// Entries are opened before the inner runner starts and share its output
/// capture, so an invocation abandoned mid-way still shows up with whatever
/// it printed.
pub struct RecordingRunner<'a> {
    inner: &'a dyn ToolRunner,
    slots: Mutex<Vec<Slot>>,
}

impl<'a> RecordingRunner<'a> {
    pub fn new(inner: &'a dyn ToolRunner) -> Self {
        Self {
            inner,
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Take the transcript collected so far.
    pub fn take_transcript(&self) -> Transcript {
        let slots = self
            .slots
            .lock()
            .map(|mut slots| std::mem::take(&mut *slots))
            .unwrap_or_default();

        let mut transcript = Transcript::new();
        for slot in slots {
            let failure = match slot.state {
                SlotState::Discarded => continue,
                SlotState::Running => Some(INTERRUPTED.to_string()),
                SlotState::Finished { failure } => failure,
            };
            transcript.push(TranscriptEntry {
                command: slot.command,
                output: slot.capture.contents(),
                failure,
            });
        }
        transcript
    }

    fn open(&self, cmd: &ToolCommand, capture: &OutputCapture) -> Option<usize> {
        let mut slots = self.slots.lock().ok()?;
        slots.push(Slot {
            command: cmd.to_string(),
            capture: capture.clone(),
            state: SlotState::Running,
        });
        Some(slots.len() - 1)
    }

    fn close(&self, index: Option<usize>, result: &MediaResult<String>) {
        let state = match result {
            Ok(_) => SlotState::Finished { failure: None },
            Err(err)
                if matches!(
                    err,
                    MediaError::ToolExecution { .. } | MediaError::Cancelled { .. }
                ) =>
            {
                SlotState::Finished {
                    failure: Some(err.to_string()),
                }
            }
            Err(_) => SlotState::Discarded,
        };
        if let (Some(index), Ok(mut slots)) = (index, self.slots.lock()) {
            if let Some(slot) = slots.get_mut(index) {
                slot.state = state;
            }
        }
    }
}

/// Failure line for an invocation that never returned.
const INTERRUPTED: &str = "interrupted: attempt abandoned before the tool exited";

#[async_trait]
impl ToolRunner for RecordingRunner<'_> {
    async fn run(&self, cmd: &ToolCommand) -> MediaResult<String> {
        self.run_captured(cmd, &OutputCapture::new()).await
    }

    async fn run_captured(&self, cmd: &ToolCommand, capture: &OutputCapture) -> MediaResult<String> {
        let index = self.open(cmd, capture);
        let result = self.inner.run_captured(cmd, capture).await;
        self.close(index, &result);
        result
    }
}
