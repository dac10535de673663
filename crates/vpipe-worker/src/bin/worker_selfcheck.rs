use std::path::Path;

use anyhow::Context;
use vpipe_media::{check_ffmpeg, check_ffprobe};
use vpipe_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with videos_dir={}",
        config.videos_dir.display()
    );
    config.validate()?;
    ensure_videos_dir(&config.videos_dir).await?;
    let config = config.resolve_paths()?;
    ensure_tools()?;
    ensure_overlay(&config.watermark_path)?;
    ensure_env_present(&["REDIS_URL"])?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_videos_dir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("cannot create {}", path.display()))
}

fn ensure_tools() -> anyhow::Result<()> {
    let ffmpeg = check_ffmpeg()?;
    let ffprobe = check_ffprobe()?;
    println!(
        "worker-selfcheck: ffmpeg={} ffprobe={}",
        ffmpeg.display(),
        ffprobe.display()
    );
    Ok(())
}

fn ensure_overlay(path: &Path) -> anyhow::Result<()> {
    if !path.is_file() {
        anyhow::bail!("watermark overlay not found: {}", path.display());
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
