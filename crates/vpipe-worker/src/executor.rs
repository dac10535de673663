//! Job executor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vpipe_media::ToolRunner;
use vpipe_models::{JobLayout, JobState};
use vpipe_queue::{Delivery, StageBroker};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::{Advance, Pipeline};
use crate::stage_runner::StageRunner;
use crate::status::observe_state;

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Stage committed and the chain moved on
    Advanced(Advance),
    /// Stage gave up; the job is failed and `error.json` is written
    Failed(JobState),
    /// The job had already failed; the delivery was dropped
    Skipped,
    /// Infrastructure error; left unacked for redelivery
    Unacked,
}

/// Renewal schedule for deliveries this worker holds.
#[derive(Debug, Clone)]
struct Lease {
    consumer: String,
    interval: Duration,
}

/// Handles deliveries: run the stage, advance or fail the chain, then ack.
pub struct StageWorker {
    runner: StageRunner,
    pipeline: Pipeline,
    lease: Option<Lease>,
}

impl StageWorker {
    pub fn new(runner: StageRunner, pipeline: Pipeline) -> Self {
        Self {
            runner,
            pipeline,
            lease: None,
        }
    }

    /// Renew each delivery as `consumer` every `interval` while it is handled.
    ///
    /// Retries keep a delivery busy for several attempts, far longer than
    /// one hard time limit. Without renewal the claim loop of any worker
    /// would take it over and run the same stage twice.
    pub fn with_lease(mut self, consumer: impl Into<String>, interval: Duration) -> Self {
        self.lease = Some(Lease {
            consumer: consumer.into(),
            // tokio intervals panic on zero
            interval: interval.max(Duration::from_millis(1)),
        });
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Process one delivery. The ack happens only after the stage returned,
    /// so a crash mid-stage leaves the delivery pending for another worker.
    pub async fn handle(&self, delivery: &Delivery) -> DeliveryOutcome {
        let invocation = &delivery.invocation;
        let broker = self.pipeline.broker();

        let already_failed = invocation
            .chain
            .job_dir()
            .map(|root| observe_state(&JobLayout::from_root(root)) == JobState::Failed)
            .unwrap_or(false);
        if already_failed {
            warn!(
                job_id = %invocation.job_id,
                stage = %invocation.stage,
                "Job already failed, dropping delivery"
            );
            return ack_then(broker.as_ref(), &delivery.id, DeliveryOutcome::Skipped).await;
        }

        self.renewing(&delivery.id, self.process(delivery)).await
    }

    async fn process(&self, delivery: &Delivery) -> DeliveryOutcome {
        let invocation = &delivery.invocation;
        let broker = self.pipeline.broker();

        match self.runner.run(invocation).await {
            Ok(outcome) => match self.pipeline.advance(invocation, &outcome.output).await {
                Ok(advance) => {
                    ack_then(broker.as_ref(), &delivery.id, DeliveryOutcome::Advanced(advance)).await
                }
                Err(e) => {
                    error!(
                        job_id = %invocation.job_id,
                        stage = %invocation.stage,
                        "Failed to advance job, leaving delivery for redelivery: {}", e
                    );
                    DeliveryOutcome::Unacked
                }
            },
            Err(failure) => match self.pipeline.fail(&failure) {
                Ok(state) => ack_then(broker.as_ref(), &delivery.id, DeliveryOutcome::Failed(state)).await,
                Err(e) => {
                    error!(job_id = %invocation.job_id, "Failed to record job failure: {}", e);
                    DeliveryOutcome::Unacked
                }
            },
        }
    }

    async fn renewing<F>(&self, delivery_id: &str, work: F) -> DeliveryOutcome
    where
        F: Future<Output = DeliveryOutcome>,
    {
        let Some(lease) = &self.lease else {
            return work.await;
        };
        let broker = self.pipeline.broker();
        tokio::pin!(work);

        let mut ticks = tokio::time::interval_at(Instant::now() + lease.interval, lease.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                outcome = &mut work => return outcome,
                _ = ticks.tick() => {
                    if let Err(e) = broker.renew(&lease.consumer, delivery_id).await {
                        warn!(delivery_id, "Failed to renew delivery: {}", e);
                    }
                }
            }
        }
    }
}

async fn ack_then(
    broker: &dyn StageBroker,
    delivery_id: &str,
    outcome: DeliveryOutcome,
) -> DeliveryOutcome {
    match broker.ack(delivery_id).await {
        Ok(()) => outcome,
        Err(e) => {
            error!("Failed to ack delivery {}: {}", delivery_id, e);
            DeliveryOutcome::Unacked
        }
    }
}

/// Job executor that processes stage invocations from the broker.
pub struct JobExecutor {
    config: WorkerConfig,
    broker: Arc<dyn StageBroker>,
    worker: Arc<StageWorker>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(
        config: WorkerConfig,
        broker: Arc<dyn StageBroker>,
        tools: Arc<dyn ToolRunner>,
    ) -> Self {
        let runner = StageRunner::from_config(tools, &config);
        let pipeline = Pipeline::new(Arc::clone(&broker));
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());
        let worker = StageWorker::new(runner, pipeline)
            .with_lease(consumer_name.clone(), lease_interval(&config));

        Self {
            config,
            broker,
            worker: Arc::new(worker),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Start the executor. Returns after `shutdown` once in-flight stages finish
    /// or the shutdown timeout passes.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow_and_update() {
            return Ok(());
        }

        // Spawn a task to claim pending deliveries periodically
        let broker = Arc::clone(&self.broker);
        let worker = Arc::clone(&self.worker);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let claim_interval = self.config.claim_interval;
        let min_idle_ms = u64::try_from(self.config.claim_min_idle.as_millis()).unwrap_or(u64::MAX);
        let mut shutdown_rx_claim = self.shutdown.subscribe();

        let claim_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx_claim.changed() => {
                        if *shutdown_rx_claim.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }
                        match broker.claim_pending(&consumer_name, min_idle_ms, available).await {
                            Ok(deliveries) if !deliveries.is_empty() => {
                                info!("Claimed {} pending deliveries", deliveries.len());
                                for delivery in deliveries {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let worker = Arc::clone(&worker);
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        worker.handle(&delivery).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Failed to claim pending deliveries: {}", e);
                            }
                        }
                    }
                }
            }
        });

        // Main consumption loop
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_deliveries() => {
                    if let Err(e) = result {
                        error!("Error consuming deliveries: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight stages to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!("Shutdown timeout reached; unacked stages will be redelivered");
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Consume and dispatch deliveries from the broker.
    async fn consume_deliveries(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .broker
            .consume(&self.consumer_name, 1000, available)
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} deliveries", deliveries.len());

        for delivery in deliveries {
            let worker = Arc::clone(&self.worker);
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::internal("executor semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                worker.handle(&delivery).await;
            });
        }

        Ok(())
    }

    /// Wait for all in-flight stages to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Renew well inside `claim_min_idle` so one late tick is not enough for a
/// claim to succeed.
fn lease_interval(config: &WorkerConfig) -> Duration {
    (config.claim_min_idle / 3).max(Duration::from_millis(10))
}
