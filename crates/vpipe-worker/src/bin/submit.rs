//! Submit a job, or show the status of an existing one.
//!
//! ```text
//! vpipe-submit <video> <video> [<video>...]
//! vpipe-submit --status <job_id>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use vpipe_models::{JobId, JobLayout};
use vpipe_queue::RedisBroker;
use vpipe_worker::{job_exists, observe_state, JobRecorder, JobSubmitter, Pipeline, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    vpipe_worker::init_tracing();

    let config = WorkerConfig::from_env()
        .resolve_paths()
        .context("cannot resolve VIDEOS_DIR")?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [flag, job_id] if flag == "--status" => show_status(&config, job_id).await,
        [] => bail!("usage: vpipe-submit <video> <video> [...] | --status <job_id>"),
        sources => submit(&config, sources).await,
    }
}

async fn submit(config: &WorkerConfig, sources: &[String]) -> anyhow::Result<()> {
    let broker = RedisBroker::from_env().context("failed to create stage broker")?;
    broker.init().await.context("failed to initialize stage broker")?;

    let submitter = JobSubmitter::new(
        &config.videos_dir,
        &config.watermark_path,
        Arc::new(Pipeline::new(Arc::new(broker))),
    );
    let sources: Vec<PathBuf> = sources.iter().map(PathBuf::from).collect();
    let job = submitter.submit(&sources).await?;

    println!("{}", job.job_id);
    Ok(())
}

async fn show_status(config: &WorkerConfig, job_id: &str) -> anyhow::Result<()> {
    let layout = JobLayout::new(&config.videos_dir, &JobId::from_string(job_id));
    if !job_exists(&layout) {
        bail!("no such job: {}", job_id);
    }

    println!("{}: {}", job_id, observe_state(&layout));

    if let Some(record) = JobRecorder::new(layout).read_failure().await? {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Ok(())
}
