use anyhow::Result;
use chrono::Duration as ChronoDuration;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use clipcast::config;
use clipcast::db;
use clipcast::dispatcher::{Dispatcher, DispatcherSettings};
use clipcast::encoder::{Assembler, FfmpegEncoder};
use clipcast::pipeline::Pipeline;
use clipcast::queue::{self, JobQueue, WorkerSettings};
use clipcast::schedule;
use clipcast::youtube::YouTubeClient;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    let offset = schedule::parse_utc_offset(&cfg.schedule.utc_offset)?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let encoder = Arc::new(FfmpegEncoder::new(
        cfg.encoder.ffmpeg.clone(),
        cfg.encoder.ffprobe.clone(),
    ));
    if let Err(err) = encoder.ensure_available().await {
        warn!(%err, "encoder check failed; generation will fail until it is installed");
    }
    let assembler = Assembler::new(encoder.clone(), cfg.temp_dir(), cfg.output_dir())?;
    let publisher = Arc::new(YouTubeClient::from_config(&cfg.youtube)?);
    let pipeline = Arc::new(
        Pipeline::new(
            pool.clone(),
            encoder,
            assembler,
            publisher,
            cfg.assembly_options(),
            offset,
        )
        .with_probe_concurrency(cfg.encoder.probe_concurrency),
    );

    let job_queue = JobQueue::new(pool.clone());
    job_queue.recover_interrupted().await?;

    let worker = tokio::spawn(queue::run_worker(
        job_queue.clone(),
        pipeline.clone(),
        WorkerSettings {
            poll_interval: cfg.poll_interval(),
            claim_delay: cfg.claim_delay(),
        },
    ));

    let dispatcher = Dispatcher::new(
        pool.clone(),
        job_queue,
        pipeline,
        DispatcherSettings {
            offset,
            daily_hour: cfg.schedule.daily_hour,
            tick: Duration::from_secs(cfg.schedule.tick_seconds),
            warmup: Duration::from_secs(cfg.schedule.warmup_seconds),
            publish_window: ChronoDuration::minutes(cfg.schedule.publish_window_minutes),
        },
    );
    let tasks = dispatcher.spawn();

    info!(offset = %offset, "clipcast running");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    worker.abort();
    for task in tasks {
        task.abort();
    }
    Ok(())
}
