//! Shared fixtures for the worker integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use vpipe_media::{MediaError, MediaResult, OutputCapture, ToolCommand, ToolRunner};
use vpipe_models::{JobId, JobLayout};
use vpipe_queue::{MemoryBroker, StageInvocation};
use vpipe_worker::{Pipeline, RetryPolicy, StageRunner, StageWorker, TimeLimits};

/// Which step of a stage a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Probe,
    Normalize,
    Concat,
    Watermark,
    Thumbnail,
}

impl Tool {
    pub fn classify(cmd: &ToolCommand) -> Self {
        if cmd.program() == "ffprobe" {
            Tool::Probe
        } else if cmd.has_arg("-filter_complex") {
            Tool::Watermark
        } else if cmd.has_arg("-frames:v") {
            Tool::Thumbnail
        } else if cmd.value_of("-f") == Some("concat") {
            Tool::Concat
        } else {
            Tool::Normalize
        }
    }
}

/// Scripted ffmpeg/ffprobe stand-in.
///
/// ffmpeg prints a progress line, then writes its last argument with a
/// deterministic body derived from the `-i` inputs. Failures, stalls and
/// silent exits are injected per tool.
pub struct FakeTools {
    probe: Mutex<Option<String>>,
    failures: Mutex<HashMap<Tool, u32>>,
    stalls: Mutex<HashMap<Tool, Duration>>,
    silent: Mutex<Vec<Tool>>,
    calls: Mutex<Vec<ToolCommand>>,
}

impl FakeTools {
    pub fn new() -> Self {
        Self {
            probe: Mutex::new(Some("42.000000\n".to_string())),
            failures: Mutex::new(HashMap::new()),
            stalls: Mutex::new(HashMap::new()),
            silent: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Duration ffprobe reports; `None` makes every probe fail.
    pub fn with_probe(self, probe: Option<&str>) -> Self {
        *self.probe.lock().unwrap() = probe.map(str::to_string);
        self
    }

    /// The next `times` invocations of `tool` exit with code 1.
    pub fn failing(self, tool: Tool, times: u32) -> Self {
        self.failures.lock().unwrap().insert(tool, times);
        self
    }

    /// Every invocation of `tool` sleeps `delay` before doing its work.
    pub fn stalling(self, tool: Tool, delay: Duration) -> Self {
        self.stalls.lock().unwrap().insert(tool, delay);
        self
    }

    /// `tool` exits 0 without writing its output file.
    pub fn silent(self, tool: Tool) -> Self {
        self.silent.lock().unwrap().push(tool);
        self
    }

    pub fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, tool: Tool) -> usize {
        self.calls()
            .iter()
            .filter(|cmd| Tool::classify(cmd) == tool)
            .count()
    }
}

#[async_trait]
impl ToolRunner for FakeTools {
    async fn run(&self, cmd: &ToolCommand) -> MediaResult<String> {
        self.run_captured(cmd, &OutputCapture::new()).await
    }

    async fn run_captured(&self, cmd: &ToolCommand, capture: &OutputCapture) -> MediaResult<String> {
        let tool = Tool::classify(cmd);
        self.calls.lock().unwrap().push(cmd.clone());
        if tool != Tool::Probe {
            capture.append(&progress_line(tool));
        }

        let stall = self.stalls.lock().unwrap().get(&tool).copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&tool) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if fail {
            let output = format!("{:?}: Conversion failed!", tool);
            capture.append(&output);
            return Err(MediaError::ToolExecution {
                command: cmd.to_string(),
                exit_code: Some(1),
                output,
            });
        }

        if tool == Tool::Probe {
            let probe = self.probe.lock().unwrap().clone();
            return match probe {
                Some(duration) => {
                    capture.append(&duration);
                    Ok(duration)
                }
                None => {
                    let output = "Invalid data found when processing input".to_string();
                    capture.append(&output);
                    Err(MediaError::ToolExecution {
                        command: cmd.to_string(),
                        exit_code: Some(1),
                        output,
                    })
                }
            };
        }

        if self.silent.lock().unwrap().contains(&tool) {
            return Ok(String::new());
        }

        let mut body = format!("{:?}\n", tool).into_bytes();
        let args = cmd.get_args();
        for pair in args.windows(2) {
            if pair[0] == "-i" {
                body.extend(std::fs::read(&pair[1])?);
            }
        }
        let out = cmd
            .last_arg()
            .ok_or_else(|| MediaError::internal("no output argument"))?;
        std::fs::write(out, body)?;
        let summary = format!("frame=1 size={}kB\n", args.len());
        capture.append(&summary);
        Ok(summary)
    }
}

/// What a fake ffmpeg prints as soon as it starts.
pub fn progress_line(tool: Tool) -> String {
    format!("{:?} frame=0 time=00:00:00.00", tool)
}

/// A job directory with uploaded inputs and an overlay image.
pub struct JobFixture {
    pub dir: TempDir,
    pub job_id: JobId,
    pub layout: JobLayout,
    pub overlay: PathBuf,
}

impl JobFixture {
    pub fn new(inputs: usize) -> (Self, Vec<PathBuf>) {
        let dir = TempDir::new().unwrap();
        let job_id = JobId::new();
        let layout = JobLayout::new(dir.path().join("videos"), &job_id);
        std::fs::create_dir_all(layout.uploads_dir()).unwrap();

        let paths = (1..=inputs)
            .map(|i| {
                let path = layout.upload_path(i, &format!("clip{}.mp4", i));
                std::fs::write(&path, format!("clip {}\n", i)).unwrap();
                path
            })
            .collect();

        let overlay = dir.path().join("logo.png");
        std::fs::write(&overlay, b"logo\n").unwrap();

        (
            Self {
                dir,
                job_id,
                layout,
                overlay,
            },
            paths,
        )
    }

    pub fn merge_invocation(&self, inputs: Vec<PathBuf>) -> StageInvocation {
        StageInvocation::first(self.job_id.clone(), self.layout.chain(inputs, &self.overlay))
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.dir.path().join("videos")
    }
}

/// Retries with millisecond backoff so tests stay fast.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
}

pub fn runner(tools: Arc<FakeTools>) -> StageRunner {
    StageRunner::new(tools).with_policy(fast_policy())
}

pub fn runner_with_limits(tools: Arc<FakeTools>, soft: Duration, hard: Duration) -> StageRunner {
    runner(tools).with_limits(TimeLimits { soft, hard })
}

pub fn worker(tools: Arc<FakeTools>, broker: Arc<MemoryBroker>) -> StageWorker {
    StageWorker::new(
        runner(tools),
        Pipeline::new(broker).with_enqueue_policy(fast_policy()),
    )
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}
