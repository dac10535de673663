//! Runs one stage invocation: time limits, retries, attempt logs, failure record.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, Instrument};

use vpipe_media::{
    merge, thumbnail, watermark, CancellableRunner, RecordingRunner, ToolRunner, WatermarkConfig,
};
use vpipe_models::{EncodingConfig, StageName};
use vpipe_queue::StageInvocation;

use crate::config::{TimeLimits, WorkerConfig};
use crate::error::{JobFailure, WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::recorder::JobRecorder;
use crate::retry::{RetryDecision, RetryPolicy};

/// A stage that committed its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub output: PathBuf,
    pub attempts: u32,
}

/// Executes stage invocations against a tool runner.
pub struct StageRunner {
    tools: Arc<dyn ToolRunner>,
    policy: RetryPolicy,
    limits: TimeLimits,
    encoding: EncodingConfig,
    watermark: WatermarkConfig,
}

impl StageRunner {
    pub fn new(tools: Arc<dyn ToolRunner>) -> Self {
        Self {
            tools,
            policy: RetryPolicy::default(),
            limits: TimeLimits::default(),
            encoding: EncodingConfig::default(),
            watermark: WatermarkConfig::default(),
        }
    }

    pub fn from_config(tools: Arc<dyn ToolRunner>, config: &WorkerConfig) -> Self {
        Self::new(tools)
            .with_policy(config.retry_policy())
            .with_limits(config.time_limits)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_limits(mut self, limits: TimeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_watermark(mut self, watermark: WatermarkConfig) -> Self {
        self.watermark = watermark;
        self
    }

    /// Run `invocation` until it commits or the retry policy gives up.
    ///
    /// On give-up the job's `error.json` is written before returning.
    pub async fn run(&self, invocation: &StageInvocation) -> Result<StageOutcome, JobFailure> {
        let logger = JobLogger::new(&invocation.job_id, invocation.stage);
        let span = logger.create_span();
        self.run_logged(invocation, &logger).instrument(span).await
    }

    async fn run_logged(
        &self,
        invocation: &StageInvocation,
        logger: &JobLogger,
    ) -> Result<StageOutcome, JobFailure> {
        let stage = invocation.stage;
        let recorder = match JobRecorder::for_chain(&invocation.chain) {
            Ok(recorder) => recorder,
            Err(e) => {
                logger.log_failure(0, &e);
                return Err(JobFailure::new(invocation.job_id.clone(), stage, e, 0));
            }
        };

        if let Err(e) = check_input(invocation).await {
            return Err(self.give_up(invocation, &recorder, logger, e, 0).await);
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            logger.log_attempt(attempt);
            metrics::record_stage_attempt(stage);
            let started = Instant::now();

            let result = self.attempt(invocation, &recorder, attempt).await;
            metrics::record_stage_duration(stage, started.elapsed().as_secs_f64());

            let error = match result {
                Ok(output) => {
                    logger.log_completion(attempt, started.elapsed());
                    return Ok(StageOutcome {
                        output,
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            metrics::record_stage_failure(stage, error.is_retryable());
            match self.policy.decide(&error, attempt) {
                RetryDecision::Retry { delay } => {
                    logger.log_retry(attempt, delay, &error);
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(self.give_up(invocation, &recorder, logger, error, attempt).await);
                }
            }
        }
    }

    /// One attempt under both time limits. The transcript is logged whatever the outcome.
    async fn attempt(
        &self,
        invocation: &StageInvocation,
        recorder: &JobRecorder,
        attempt: u32,
    ) -> WorkerResult<PathBuf> {
        let stage = invocation.stage;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancellable = CancellableRunner::new(self.tools.as_ref(), cancel_rx);
        let recording = RecordingRunner::new(&cancellable);

        let work = self.execute(&recording, invocation);
        let result = match tokio::time::timeout(
            self.limits.hard,
            with_soft_limit(work, self.limits.soft, &cancel_tx),
        )
        .await
        {
            Ok((Ok(output), _)) => Ok(output),
            Ok((Err(_), true)) => Err(WorkerError::SoftTimeLimit {
                stage,
                limit: self.limits.soft,
            }),
            Ok((Err(e), false)) => Err(e),
            // Dropping the attempt drops any running child, which kills it.
            Err(_) => Err(WorkerError::HardTimeLimit {
                stage,
                limit: self.limits.hard,
            }),
        };

        let transcript = recording.take_transcript();
        if let Err(e) = recorder.record_attempt(stage, attempt, &transcript).await {
            error!(
                job_id = %invocation.job_id,
                stage = %stage,
                attempt,
                "Failed to write attempt log: {}", e
            );
        }

        result
    }

    async fn execute(
        &self,
        runner: &dyn ToolRunner,
        invocation: &StageInvocation,
    ) -> WorkerResult<PathBuf> {
        let chain = &invocation.chain;
        let output = match invocation.stage {
            StageName::Merge => {
                merge(runner, &chain.inputs, &chain.merged_output, &self.encoding).await?
            }
            StageName::Watermark => {
                watermark(
                    runner,
                    stage_input(invocation)?,
                    &chain.overlay,
                    &chain.final_output,
                    &self.watermark,
                    &self.encoding,
                )
                .await?
            }
            StageName::Thumbnail => {
                thumbnail(runner, stage_input(invocation)?, &chain.thumbnail_output).await?
            }
        };
        Ok(output)
    }

    async fn give_up(
        &self,
        invocation: &StageInvocation,
        recorder: &JobRecorder,
        logger: &JobLogger,
        error: WorkerError,
        attempts: u32,
    ) -> JobFailure {
        logger.log_failure(attempts, &error);
        let failure = JobFailure::new(invocation.job_id.clone(), invocation.stage, error, attempts);
        if let Err(e) = recorder.record_failure(&failure.record()).await {
            logger.log_warning(&format!("failed to write error record: {}", e));
        }
        failure
    }
}

/// Drive `work`; once `limit` passes, flip the cancel flag and let it unwind.
///
/// Returns the work's result and whether the soft limit fired.
async fn with_soft_limit<F: Future>(
    work: F,
    limit: Duration,
    cancel_tx: &watch::Sender<bool>,
) -> (F::Output, bool) {
    tokio::pin!(work);
    tokio::select! {
        output = &mut work => (output, false),
        _ = tokio::time::sleep(limit) => {
            cancel_tx.send(true).ok();
            (work.await, true)
        }
    }
}

fn stage_input(invocation: &StageInvocation) -> WorkerResult<&Path> {
    invocation
        .input
        .as_deref()
        .ok_or_else(|| WorkerError::invalid_invocation(format!("{} stage has no input", invocation.stage)))
}

/// Stages after the first must start from a committed, non-empty file.
async fn check_input(invocation: &StageInvocation) -> WorkerResult<()> {
    if invocation.stage == StageName::Merge {
        return Ok(());
    }
    let input = stage_input(invocation)?;
    match tokio::fs::metadata(input).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(_) => Err(WorkerError::invalid_invocation(format!(
            "input is empty: {}",
            input.display()
        ))),
        Err(_) => Err(WorkerError::invalid_invocation(format!(
            "input not found: {}",
            input.display()
        ))),
    }
}
