//! Command handlers: build options, run, print summaries.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::arg_parser::{Cli, Commands, CommonArgs, RunArgs};
use crate::engine::db_ops::{Store, TableCounts};
use crate::engine::signal::StopSignal;
use crate::engine::tracker::ProgressTracker;
use crate::error::PipelineError;
use crate::ingest::{Ingestor, RunReport};
use crate::types::{IngestMode, IngestionUnit, Opts, UnitStatus, WorkPolicy};
use crate::utils::config::WatchConsts;
use crate::utils::edgarsync_toml::{apply_file_to_opts, default_config_path, load_edgarsync_toml};
use crate::utils::{Colors, resolve_user_agent, setup_logging};

/// Defaults → config file → CLI flags. Also initializes logging.
fn setup_opts(common: &CommonArgs, run: Option<&RunArgs>) -> Opts {
    let mut opts = Opts::default();
    let cwd = PathBuf::from(".");
    let config_path = common
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&cwd));
    let file = load_edgarsync_toml(&config_path);
    if let Some(ref f) = file {
        apply_file_to_opts(f, &mut opts);
    }
    if let Some(v) = common.verbose {
        opts.verbose = v;
    }
    setup_logging(opts.verbose);
    if file.is_some() {
        debug!("Loaded {}", config_path.display());
    }
    if let Some(ref db) = common.db {
        opts.db_path = db.clone();
    }

    if let Some(r) = run {
        let file_ua = file.as_ref().and_then(|f| f.settings.user_agent.as_deref());
        opts.user_agent = match r.user_agent.clone() {
            Some(ua) => ua,
            None => resolve_user_agent(&cwd, file_ua),
        };
        if let Some(y) = r.start_year {
            opts.start_year = y;
        }
        if let Some(y) = r.end_year {
            opts.end_year = y;
        }
        if r.force == Some(true) {
            opts.policy = WorkPolicy::Force;
        }
        if r.bulk == Some(true) {
            opts.mode = IngestMode::Bulk;
        }
        if let Some(n) = r.workers {
            opts.fetch_workers = Some(n);
        }
        if let Some(n) = r.parse_workers {
            opts.parse_workers = n;
        }
        if let Some(n) = r.batch_size {
            opts.batch_size = n;
        }
        if let Some(n) = r.chunk_size {
            opts.chunk_size = n;
        }
        if let Some(n) = r.max_requests {
            opts.rate_limit.max_requests = n;
        }
        if r.max_filings.is_some() {
            opts.max_filings = r.max_filings;
        }
    }
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        opts
    );
    opts
}

fn status_label(status: UnitStatus) -> colored::ColoredString {
    match status {
        UnitStatus::Completed => Colors::ok(status.as_str()),
        UnitStatus::Failed => Colors::failed(status.as_str()),
        UnitStatus::InProgress => Colors::active(status.as_str()),
        UnitStatus::Pending => Colors::muted(status.as_str()),
    }
}

fn print_summary(report: &RunReport) {
    if report.is_idle() {
        println!("{}", Colors::ok("Nothing to do: every year in range is complete."));
        return;
    }
    println!();
    println!(
        "{:<6} {:<12} {:>10} {:>10} {:>10} {:>10} {:>8}",
        "YEAR", "STATUS", "FOUND", "FETCHED", "STORED", "SKIPPED", "ERRORS"
    );
    for u in &report.units {
        let s = u.stats.clone().unwrap_or_default();
        println!(
            "{:<6} {:<12} {:>10} {:>10} {:>10} {:>10} {:>8}",
            u.unit_id,
            status_label(u.status),
            u.discovered,
            s.downloaded,
            s.stored,
            s.skipped,
            s.errors
        );
    }
    let t = report.totals();
    println!(
        "Total: {} stored, {} skipped, {} errors ({} throttled)",
        t.stored, t.skipped, t.errors, t.throttled
    );
    let failed: Vec<_> = report.failed().collect();
    if !failed.is_empty() {
        println!("{}", Colors::failed("Failed years:"));
        for u in failed {
            println!(
                "  {}: {}",
                u.unit_id,
                u.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

fn install_stop() -> Result<StopSignal> {
    let stop = StopSignal::new();
    stop.install_ctrlc()?;
    Ok(stop)
}

/// One pass over the range.
pub fn handle_run(common: &CommonArgs, args: &RunArgs) -> Result<()> {
    let opts = setup_opts(common, Some(args));
    let stop = install_stop()?;
    let ingestor = Ingestor::from_opts(opts, stop)?;
    let report = ingestor.run()?;
    print_summary(&report);
    if report.cancelled {
        return Err(PipelineError::Cancelled.into());
    }
    Ok(())
}

/// Pauses between watch passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchPauses {
    pub idle: Duration,
    pub retry: Duration,
    pub error: Duration,
}

impl Default for WatchPauses {
    fn default() -> Self {
        Self {
            idle: WatchConsts::IDLE_SLEEP,
            retry: WatchConsts::RETRY_SLEEP,
            error: WatchConsts::ERROR_SLEEP,
        }
    }
}

/// Call `pass` until `stop` is raised or a pass reports cancellation. `pass` gets `true` on the
/// first call only. A pass that errors is logged and tried again after `pauses.error`.
pub fn watch_loop<F>(stop: &StopSignal, pauses: WatchPauses, mut pass: F)
where
    F: FnMut(bool) -> Result<RunReport>,
{
    let mut first = true;
    loop {
        let pause = match pass(first) {
            Ok(report) => {
                print_summary(&report);
                if report.cancelled {
                    break;
                }
                if report.has_failures() {
                    pauses.retry
                } else {
                    pauses.idle
                }
            }
            Err(e) if crate::error::is_cancellation(&e) => break,
            Err(e) => {
                warn!("Watch pass failed: {:#}", e);
                pauses.error
            }
        };
        first = false;
        info!("Next pass in {} min", pause.as_secs() / 60);
        if !stop.sleep(pause) {
            break;
        }
    }
    info!("Watch stopped");
}

/// Repeat incremental passes until Ctrl+C. Force applies to the first pass only.
pub fn handle_watch(common: &CommonArgs, args: &RunArgs) -> Result<()> {
    let stop = install_stop()?;
    watch_loop(&stop, WatchPauses::default(), |first| {
        let mut opts = setup_opts(common, Some(args));
        if !first {
            opts.policy = WorkPolicy::Incremental;
        }
        Ingestor::from_opts(opts, stop.clone())?.run()
    });
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    units: Vec<IngestionUnit>,
    counts: TableCounts,
}

fn load_status(db_path: &Path, stale_after_hours: i64) -> Result<StatusReport> {
    let tracker = ProgressTracker::open(db_path, stale_after_hours)?;
    let store = Store::open(db_path)?;
    Ok(StatusReport {
        units: tracker.units(None)?,
        counts: store.counts()?,
    })
}

pub fn handle_status(common: &CommonArgs, json: bool) -> Result<()> {
    let opts = setup_opts(common, None);
    let status = load_status(&opts.db_path, opts.stale_after_hours)?;
    if json {
        let s = serde_json::to_string_pretty(&status).context("serialize status")?;
        println!("{s}");
        return Ok(());
    }
    if status.units.is_empty() {
        println!("{}", Colors::muted("No progress recorded yet."));
    } else {
        println!(
            "{:<6} {:<12} {:>10} {:>10} {:>10} {:>8} {:<25} ERROR",
            "YEAR", "STATUS", "FOUND", "STORED", "SKIPPED", "ERRORS", "UPDATED"
        );
        for u in &status.units {
            let c = &u.counters;
            println!(
                "{:<6} {:<12} {:>10} {:>10} {:>10} {:>8} {:<25} {}",
                u.unit_id,
                status_label(u.status),
                c.discovered,
                c.stored,
                c.skipped,
                c.errors,
                u.last_updated.format("%Y-%m-%d %H:%M:%S UTC"),
                u.error_message.as_deref().unwrap_or("")
            );
        }
    }
    let c = status.counts;
    println!();
    println!(
        "Database: {} filings ({} parsed), {} companies, {} insiders",
        c.filings, c.processed, c.companies, c.insiders
    );
    Ok(())
}

pub fn handle_reset(common: &CommonArgs, units: &[crate::types::UnitId]) -> Result<()> {
    let opts = setup_opts(common, None);
    let mut tracker = ProgressTracker::open(&opts.db_path, opts.stale_after_hours)?;
    let removed = tracker.reset(units)?;
    if removed < units.len() {
        warn!(
            "{} of {} years had no progress to reset",
            units.len() - removed,
            units.len()
        );
    }
    info!("Reset {} year(s): {:?}", removed, units);
    Ok(())
}

pub fn dispatch(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run(args) => handle_run(&cli.common, args),
        Commands::Watch(args) => handle_watch(&cli.common, args),
        Commands::Status { json } => handle_status(&cli.common, *json),
        Commands::Reset { units } => handle_reset(&cli.common, units),
    }
}
