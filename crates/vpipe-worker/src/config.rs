//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};
use crate::retry::RetryPolicy;

/// Per-attempt time limits for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLimits {
    /// The running tool is asked to stop; the attempt fails as retryable
    pub soft: Duration,
    /// The attempt is abandoned outright
    pub hard: Duration,
}

impl Default for TimeLimits {
    fn default() -> Self {
        Self {
            soft: Duration::from_secs(900),
            hard: Duration::from_secs(1200),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root under which each job gets its own directory
    pub videos_dir: PathBuf,
    /// Overlay image applied by the watermark stage
    pub watermark_path: PathBuf,
    /// Maximum concurrent stage invocations
    pub max_concurrent_jobs: usize,
    /// Stage time limits
    pub time_limits: TimeLimits,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff base (doubles each retry)
    pub retry_base_delay: Duration,
    /// Backoff cap
    pub retry_max_delay: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker should scan for orphaned pending deliveries
    pub claim_interval: Duration,
    /// Minimum idle time before a pending delivery can be claimed (crash recovery).
    /// Deliveries being handled are renewed at a third of this.
    pub claim_min_idle: Duration,
    /// Prometheus listener; metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            videos_dir: PathBuf::from("videos"),
            watermark_path: PathBuf::from("logo.png"),
            max_concurrent_jobs: 2,
            time_limits: TimeLimits::default(),
            max_retries: policy.max_retries,
            retry_base_delay: policy.base_delay,
            retry_max_delay: policy.max_delay,
            shutdown_timeout: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
            // Longer than the hard limit.
            claim_min_idle: Duration::from_secs(1500),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            videos_dir: std::env::var("VIDEOS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.videos_dir),
            watermark_path: std::env::var("WATERMARK_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.watermark_path),
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS").unwrap_or(defaults.max_concurrent_jobs),
            time_limits: TimeLimits {
                soft: env_secs("STAGE_SOFT_TIME_LIMIT_SECS").unwrap_or(defaults.time_limits.soft),
                hard: env_secs("STAGE_HARD_TIME_LIMIT_SECS").unwrap_or(defaults.time_limits.hard),
            },
            max_retries: env_parse("STAGE_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_base_delay: env_millis("STAGE_RETRY_BASE_MS").unwrap_or(defaults.retry_base_delay),
            retry_max_delay: env_millis("STAGE_RETRY_MAX_MS").unwrap_or(defaults.retry_max_delay),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT").unwrap_or(defaults.shutdown_timeout),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS").unwrap_or(defaults.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS").unwrap_or(defaults.claim_min_idle),
            metrics_addr: env_parse("METRICS_ADDR"),
        }
    }

    /// Reject limit combinations that would break retries or crash recovery.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_JOBS must be at least 1"));
        }
        if self.time_limits.hard < self.time_limits.soft {
            return Err(WorkerError::config_error(
                "hard time limit must not be shorter than the soft limit",
            ));
        }
        if self.claim_min_idle <= self.time_limits.hard {
            return Err(WorkerError::config_error(
                "claim idle time must exceed the hard time limit",
            ));
        }
        Ok(())
    }

    /// Make `videos_dir` and `watermark_path` absolute, creating `videos_dir`.
    ///
    /// Chain paths travel inside broker payloads and must not depend on the
    /// working directory of the process that reads them.
    pub fn resolve_paths(mut self) -> WorkerResult<Self> {
        std::fs::create_dir_all(&self.videos_dir)?;
        self.videos_dir = std::fs::canonicalize(&self.videos_dir)?;
        self.watermark_path = std::path::absolute(&self.watermark_path)?;
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse(key).map(Duration::from_secs)
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse(key).map(Duration::from_millis)
}
