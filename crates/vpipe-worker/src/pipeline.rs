//! Stage chaining: submit the first stage, enqueue each successor on commit.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use vpipe_models::{ChainSpec, JobEvent, JobId, JobState};
use vpipe_queue::{StageBroker, StageInvocation};

use crate::error::{JobFailure, WorkerError, WorkerResult};
use crate::metrics;
use crate::retry::{retry_async, RetryPolicy};

/// Result of advancing a job past a committed stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// The next stage is on the broker
    Enqueued(StageInvocation),
    /// The last stage committed
    Completed,
}

/// Orchestrates a job's stage chain over an injected broker.
///
/// A stage is only ever enqueued after its predecessor's output is committed,
/// which keeps the stages of one job strictly sequential.
pub struct Pipeline {
    broker: Arc<dyn StageBroker>,
    enqueue_policy: RetryPolicy,
}

impl Pipeline {
    pub fn new(broker: Arc<dyn StageBroker>) -> Self {
        Self {
            broker,
            enqueue_policy: RetryPolicy::default()
                .with_base_delay(std::time::Duration::from_millis(200))
                .with_max_delay(std::time::Duration::from_secs(5)),
        }
    }

    /// Override the retry policy for broker enqueues.
    pub fn with_enqueue_policy(mut self, policy: RetryPolicy) -> Self {
        self.enqueue_policy = policy;
        self
    }

    pub fn broker(&self) -> &Arc<dyn StageBroker> {
        &self.broker
    }

    /// Validate a chain and enqueue its first stage.
    pub async fn submit(&self, job_id: JobId, chain: ChainSpec) -> WorkerResult<StageInvocation> {
        chain.validate()?;
        let invocation = StageInvocation::first(job_id, chain);
        self.enqueue(&invocation).await?;
        info!(
            job_id = %invocation.job_id,
            inputs = invocation.chain.inputs.len(),
            "Job submitted"
        );
        Ok(invocation)
    }

    /// Enqueue the successor of a stage whose output is committed.
    pub async fn advance(
        &self,
        invocation: &StageInvocation,
        output: &Path,
    ) -> WorkerResult<Advance> {
        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => {
                return Err(WorkerError::invalid_invocation(format!(
                    "{} output not committed: {}",
                    invocation.stage,
                    output.display()
                )))
            }
        }

        // The job is in this stage's running state while its delivery is
        // handled, so this only checks that the event belongs to the stage.
        let state = invocation
            .stage
            .running_state()
            .transition(JobEvent::StageCommitted(invocation.stage))?;
        debug!(job_id = %invocation.job_id, state = %state, "Stage committed");

        match invocation.successor() {
            Some(next) => {
                self.enqueue(&next).await?;
                Ok(Advance::Enqueued(next))
            }
            None => {
                metrics::record_job_completed();
                info!(job_id = %invocation.job_id, state = %state, "Job completed");
                Ok(Advance::Completed)
            }
        }
    }

    /// Mark the chain as halted. No later stage is enqueued.
    pub fn fail(&self, failure: &JobFailure) -> WorkerResult<JobState> {
        // Failed is reachable from every running state.
        let state = failure
            .stage
            .running_state()
            .transition(JobEvent::Failed)?;
        metrics::record_job_failed(failure.stage);
        warn!(
            job_id = %failure.job_id,
            stage = %failure.stage,
            attempts = failure.attempts,
            state = %state,
            "Job halted: {}", failure.error
        );
        Ok(state)
    }

    /// Enqueue with transient-error retries. A duplicate means an earlier
    /// run of the same stage already enqueued it, which counts as success.
    async fn enqueue(&self, invocation: &StageInvocation) -> WorkerResult<()> {
        let broker = &self.broker;
        let result = retry_async(&self.enqueue_policy, "enqueue", || async move {
            match broker.enqueue(invocation).await {
                Ok(_) => Ok(()),
                Err(e) if e.is_duplicate() => {
                    debug!(
                        job_id = %invocation.job_id,
                        stage = %invocation.stage,
                        "Stage already enqueued"
                    );
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
        .await;
        result.map_err(WorkerError::from)
    }
}
