use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::types::UnitId;

/// Resumable, rate-limited ingestion of SEC EDGAR ownership filings into SQLite.
#[derive(Clone, Parser)]
#[command(name = "edgarsync", version)]
#[command(about = "Ingest EDGAR filings year by year; re-runs pick up where the last one stopped.")]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand.
#[derive(Clone, Args)]
pub struct CommonArgs {
    /// SQLite database path. Default: `edgarsync.db` in the working directory.
    #[arg(long, short, global = true)]
    pub db: Option<PathBuf>,

    /// Config file. Default: `.edgarsync.toml` in the working directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (debug logs, progress bars).
    #[arg(long, short = 'v', global = true, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

/// Options for `run` and `watch`.
#[derive(Clone, Args, Default)]
pub struct RunArgs {
    /// First year to ingest. Default: 1995 (or config).
    #[arg(long)]
    pub start_year: Option<UnitId>,

    /// Last year to ingest. Default: the current year.
    #[arg(long)]
    pub end_year: Option<UnitId>,

    /// Re-process every year in range and overwrite stored filings.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub force: Option<bool>,

    /// Use the bulk backfill engine (raw content, no parse) instead of the per-item pipeline.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub bulk: Option<bool>,

    /// Fetch workers (capped at 8).
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Parse workers (pipeline only).
    #[arg(long)]
    pub parse_workers: Option<usize>,

    /// Store batch size (pipeline only).
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Filings per fetch chunk (bulk only).
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Requests per second ceiling.
    #[arg(long)]
    pub max_requests: Option<usize>,

    /// Stop discovery after this many filings per year (testing aid).
    #[arg(long)]
    pub max_filings: Option<usize>,

    /// User-Agent sent to the archive. Overrides EDGARSYNC_USER_AGENT and the config file.
    #[arg(long)]
    pub user_agent: Option<String>,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Ingest every year in range that still needs work.
    Run(RunArgs),

    /// Keep ingesting: rerun hourly when caught up, every 30 minutes after failures.
    Watch(RunArgs),

    /// Show per-year progress and database counts.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Forget progress for the given years so the next run redoes them.
    Reset {
        #[arg(value_name = "YEAR", num_args = 1.., required = true)]
        units: Vec<UnitId>,
    },
}
