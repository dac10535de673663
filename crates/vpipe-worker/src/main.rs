//! Video job pipeline worker binary.

use std::sync::Arc;
use tracing::{error, info};

use vpipe_media::ProcessRunner;
use vpipe_queue::RedisBroker;
use vpipe_worker::{init_tracing, JobExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting vpipe-worker");

    // Load configuration
    let config = WorkerConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid worker config: {}", e);
        std::process::exit(1);
    }
    let config = match config.resolve_paths() {
        Ok(config) => config,
        Err(e) => {
            error!("Cannot resolve worker paths: {}", e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        if let Err(e) = vpipe_worker::metrics::init_metrics(addr) {
            error!("Failed to start metrics exporter: {}", e);
            std::process::exit(1);
        }
        info!("Prometheus metrics on {}", addr);
    }

    // Create broker client
    let broker = match RedisBroker::from_env() {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to create stage broker: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = broker.init().await {
        error!("Failed to initialize stage broker: {}", e);
        std::process::exit(1);
    }

    let executor = Arc::new(JobExecutor::new(
        config,
        Arc::new(broker),
        Arc::new(ProcessRunner::new()),
    ));

    // Setup signal handlers
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    // Run executor
    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
