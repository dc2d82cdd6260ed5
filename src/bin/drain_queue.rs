use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use clipcast::config;
use clipcast::db;
use clipcast::encoder::{Assembler, FfmpegEncoder};
use clipcast::pipeline::Pipeline;
use clipcast::queue::{self, JobQueue};
use clipcast::schedule;
use clipcast::youtube::YouTubeClient;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Process every pending work item and exit when the queue is empty"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Stop after this many items even if more are pending
    #[arg(long)]
    max_items: Option<usize>,

    /// Fail items left `processing` by a crashed process before draining
    #[arg(long)]
    recover: bool,
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
    encoder.ensure_available().await?;
    let assembler = Assembler::new(encoder.clone(), cfg.temp_dir(), cfg.output_dir())?;
    let publisher = Arc::new(YouTubeClient::from_config(&cfg.youtube)?);
    let pipeline = Pipeline::new(
        pool.clone(),
        encoder,
        assembler,
        publisher,
        cfg.assembly_options(),
        offset,
    )
    .with_probe_concurrency(cfg.encoder.probe_concurrency);

    let job_queue = JobQueue::new(pool);
    if args.recover {
        job_queue.recover_interrupted().await?;
    }

    let before = job_queue.stats().await?;
    info!(
        pending = before.pending,
        processing = before.processing,
        "Initial queue state"
    );
    if before.pending == 0 {
        info!("No pending work items, exiting");
        return Ok(());
    }
    if before.processing > 0 {
        warn!(
            processing = before.processing,
            "Items are still processing; another worker may be running"
        );
    }

    let processed = queue::drain(&job_queue, &pipeline, args.max_items).await?;
    let after = job_queue.stats().await?;
    info!(
        processed,
        completed = after.completed - before.completed,
        failed = after.failed - before.failed,
        remaining = after.pending,
        "Queue drain finished"
    );
    Ok(())
}
