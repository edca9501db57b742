mod cli;
mod demo;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use conflux_core::{load_dotenv, RuntimeConfig};
use conflux_queue::TaskQueue;

use crate::cli::CliArgs;
use crate::demo::Workload;

// The queue only guarantees cancel-before-start on a current-thread runtime.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RuntimeConfig::from_env().context("invalid configuration in environment")?,
    };
    if let Some(concurrency) = args.concurrency {
        config.queue.concurrency = concurrency;
    }
    if args.unordered {
        config.pipeline.ordered = false;
    }
    config.validate()?;
    config.log_summary();

    let queue = match config.queue.bounded_concurrency() {
        Some(limit) => TaskQueue::new(limit)?,
        None => TaskQueue::unbounded(),
    };
    let priority = args.priority.unwrap_or(config.queue.default_priority);
    let workload = Workload {
        count: args.count,
        max_delay: Duration::from_millis(args.delay_ms),
        fail_at: args.fail_at,
    };

    info!(count = workload.count, priority, "starting pipeline");
    let started = Instant::now();
    let mut pipeline = demo::pipeline(&workload, &queue, config.pipeline.ordered, priority);
    let mut encode_error = None;
    let result = demo::drive(&mut pipeline, |item| match demo::render(item, args.json) {
        Ok(line) => println!("{line}"),
        Err(e) => {
            encode_error.get_or_insert(e);
        }
    })
    .await;
    drop(pipeline);
    if let Some(e) = encode_error {
        return Err(e).context("failed to encode delivered item");
    }

    let stats = queue.stats();
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        completed = stats.completed,
        failed = stats.failed,
        cancelled = stats.cancelled,
        peak_running = stats.peak_running,
        "pipeline done"
    );
    if args.stats_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    match result {
        Ok(delivered) => {
            info!(delivered, "all items delivered");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "pipeline stopped early");
            Err(e).context("pipeline stopped early")
        }
    }
}
