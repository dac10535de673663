//! Video job pipeline worker.
//!
//! This crate provides:
//! - The stage runner (time limits, retries, attempt logs)
//! - The pipeline orchestrator that chains merge, watermark and thumbnail
//! - Job submission and on-disk status
//! - A broker-driven executor with crash recovery and graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod recorder;
pub mod retry;
pub mod stage_runner;
pub mod status;
pub mod submit;

pub use config::{TimeLimits, WorkerConfig};
pub use error::{JobFailure, WorkerError, WorkerResult};
pub use executor::{DeliveryOutcome, JobExecutor, StageWorker};
pub use logging::{init_tracing, JobLogger};
pub use pipeline::{Advance, Pipeline};
pub use recorder::JobRecorder;
pub use retry::{retry_async, RetryDecision, RetryPolicy};
pub use stage_runner::{StageOutcome, StageRunner};
pub use status::{job_exists, observe_state};
pub use submit::{JobSubmitter, SubmittedJob};
