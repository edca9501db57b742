use std::path::PathBuf;

use clap::Parser;

/// Push a simulated workload through a bounded priority queue.
///
/// Each item sleeps for a pseudo-random slice of `--delay-ms` and then
/// yields its square. Results are printed as the pipeline delivers them.
#[derive(Parser, Debug)]
#[command(name = "conflux", version, about)]
pub struct CliArgs {
    /// Path to a TOML config file.
    #[arg(long, env = "CONFLUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue concurrency override (0 = unbounded).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Priority for the pipeline's tasks (overrides queue.default_priority).
    #[arg(long, allow_negative_numbers = true)]
    pub priority: Option<i64>,

    /// Number of items to process.
    #[arg(long, default_value_t = 16)]
    pub count: u64,

    /// Upper bound of simulated work per item, in milliseconds.
    #[arg(long, default_value_t = 50)]
    pub delay_ms: u64,

    /// Deliver results in completion order.
    #[arg(long)]
    pub unordered: bool,

    /// Make the item at this index fail.
    #[arg(long)]
    pub fail_at: Option<u64>,

    /// Print each delivered item as a JSON line.
    #[arg(long)]
    pub json: bool,

    /// Print final queue statistics as JSON.
    #[arg(long)]
    pub stats_json: bool,
}
