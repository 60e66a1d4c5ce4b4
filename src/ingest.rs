//! Unit runner: select units, discover each one's filings, push them through the chosen engine,
//! and record the outcome on the progress row.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

use crate::bulk::{BulkConfig, BulkOrchestrator};
use crate::discovery::IndexWalker;
use crate::engine::db_ops::Store;
use crate::engine::fetch::{FetchPolicy, Fetcher, HttpTransport, Transport};
use crate::engine::parser::{FilingParser, OwnershipParser};
use crate::engine::rate_limiter::{AdaptiveRateLimiter, RateLimiter};
use crate::engine::signal::StopSignal;
use crate::engine::tracker::ProgressTracker;
use crate::error::{PipelineError, TransitionError};
use crate::pipeline::{PipelineConfig, PipelineCoordinator};
use crate::types::{
    FilingDescriptor, IngestMode, Opts, ProcessingStats, UnitId, UnitStatus, WorkPolicy,
};
use crate::utils::config::FetchConsts;

/// Reason recorded on units interrupted by Ctrl+C.
pub const CANCEL_REASON: &str = "cancelled by user";
pub const NO_FILINGS_REASON: &str = "no filings discovered";

/// Outcome of one unit in a run.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitReport {
    pub unit_id: UnitId,
    pub status: UnitStatus,
    pub discovered: u64,
    pub stats: Option<ProcessingStats>,
    pub error: Option<String>,
}

/// Outcome of a whole run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunReport {
    pub units: Vec<UnitReport>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.status == UnitStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Nothing needed doing.
    pub fn is_idle(&self) -> bool {
        self.units.is_empty() && !self.cancelled
    }

    /// Sum of per-unit stats (timestamps left empty).
    pub fn totals(&self) -> ProcessingStats {
        let mut t = ProcessingStats::default();
        for s in self.units.iter().filter_map(|u| u.stats.as_ref()) {
            t.total += s.total;
            t.downloaded += s.downloaded;
            t.parsed += s.parsed;
            t.stored += s.stored;
            t.skipped += s.skipped;
            t.errors += s.errors;
            t.throttled += s.throttled;
        }
        t
    }
}

/// Drops descriptors already stored. Returns the rest and how many were dropped.
fn prefilter_existing(
    store: &Store,
    descriptors: Vec<FilingDescriptor>,
) -> Result<(Vec<FilingDescriptor>, u64)> {
    let keys: Vec<String> = descriptors
        .iter()
        .map(|d| d.accession_number.clone())
        .collect();
    let existing: HashSet<String> = store.existing_keys(&keys)?;
    let dropped = existing.len() as u64;
    let remaining = descriptors
        .into_iter()
        .filter(|d| !existing.contains(&d.accession_number))
        .collect();
    Ok((remaining, dropped))
}

/// Owns the collaborators for a run. One limiter is shared by discovery and every fetch worker.
pub struct Ingestor {
    opts: Opts,
    transport: Arc<dyn Transport>,
    parser: Arc<dyn FilingParser>,
    limiter: Arc<dyn RateLimiter>,
    fetch_policy: FetchPolicy,
    cancel: StopSignal,
}

impl Ingestor {
    pub fn new(
        opts: Opts,
        transport: Arc<dyn Transport>,
        parser: Arc<dyn FilingParser>,
        cancel: StopSignal,
    ) -> Self {
        let limiter: Arc<dyn RateLimiter> = Arc::new(AdaptiveRateLimiter::new(&opts.rate_limit));
        Self {
            opts,
            transport,
            parser,
            limiter,
            fetch_policy: FetchPolicy::default(),
            cancel,
        }
    }

    /// HTTP transport and the ownership parser.
    pub fn from_opts(opts: Opts, cancel: StopSignal) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(
            &opts.user_agent,
            FetchConsts::REQUEST_TIMEOUT,
        )?);
        let parser = Arc::new(OwnershipParser::new()?);
        Ok(Self::new(opts, transport, parser, cancel))
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    fn fetcher(&self) -> Arc<Fetcher> {
        Arc::new(Fetcher::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.limiter),
            self.fetch_policy.clone(),
        ))
    }

    fn walker(&self) -> Result<IndexWalker> {
        IndexWalker::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.limiter),
            &self.opts.archive_base,
            &self.opts.form_type,
        )
    }

    /// Process every unit in range that needs work, in order. A failing unit is recorded and the
    /// run moves on; a cancellation fails the active unit and ends the run.
    pub fn run(&self) -> Result<RunReport> {
        let opts = &self.opts;
        let mut tracker = ProgressTracker::open(&opts.db_path, opts.stale_after_hours)?;
        let units = tracker.units_needing_work(opts.start_year..=opts.end_year, opts.policy)?;
        let mut report = RunReport::default();
        if units.is_empty() {
            info!(
                "All units {}..={} are up to date",
                opts.start_year, opts.end_year
            );
            return Ok(report);
        }
        info!("Units needing work: {:?}", units);

        let fetcher = self.fetcher();
        let walker = self.walker()?;

        for unit_id in units {
            if self.cancel.is_raised() {
                report.cancelled = true;
                break;
            }
            match self.run_unit(&mut tracker, &walker, &fetcher, unit_id) {
                Ok(Some(unit)) => report.units.push(unit),
                Ok(None) => {}
                Err(e) if crate::error::is_cancellation(&e) => {
                    let n = tracker.fail_active(CANCEL_REASON);
                    warn!("Run cancelled; {} unit(s) marked failed", n);
                    report.units.push(UnitReport {
                        unit_id,
                        status: UnitStatus::Failed,
                        discovered: 0,
                        stats: None,
                        error: Some(CANCEL_REASON.to_string()),
                    });
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    let msg = format!("{e:#}");
                    let marked = tracker.active_units().contains(&unit_id)
                        && tracker
                            .mark_failed(unit_id, &msg, None)
                            .map_err(|mark_err| {
                                warn!("Could not mark unit {} failed: {:#}", unit_id, mark_err)
                            })
                            .is_ok();
                    if !marked {
                        warn!("Unit {} failed: {}", unit_id, msg);
                    }
                    report.units.push(UnitReport {
                        unit_id,
                        status: UnitStatus::Failed,
                        discovered: 0,
                        stats: None,
                        error: Some(msg),
                    });
                }
            }
        }
        Ok(report)
    }

    /// `Ok(None)` if another process holds or already finished the unit. Cancellation comes back
    /// as an error.
    fn run_unit(
        &self,
        tracker: &mut ProgressTracker,
        walker: &IndexWalker,
        fetcher: &Arc<Fetcher>,
        unit_id: UnitId,
    ) -> Result<Option<UnitReport>> {
        let opts = &self.opts;
        if let Err(e) = tracker.mark_started(unit_id, opts.policy) {
            match e.downcast_ref::<TransitionError>() {
                Some(TransitionError::Busy { .. })
                | Some(TransitionError::Illegal {
                    from: UnitStatus::Completed,
                    ..
                }) => {
                    warn!("Skipping unit {}: {}", unit_id, e);
                    return Ok(None);
                }
                _ => return Err(e),
            }
        }

        let failed = |tracker: &mut ProgressTracker, discovered: u64, msg: String| {
            tracker.mark_failed(unit_id, &msg, None)?;
            Ok::<_, anyhow::Error>(Some(UnitReport {
                unit_id,
                status: UnitStatus::Failed,
                discovered,
                stats: None,
                error: Some(msg),
            }))
        };

        let descriptors = match walker.discover_unit(unit_id, &self.cancel, opts.max_filings) {
            Ok(d) => d,
            Err(e) if crate::error::is_cancellation(&e) => return Err(e),
            Err(e) => return failed(tracker, 0, format!("discovery failed: {e:#}")),
        };
        let discovered = descriptors.len() as u64;
        if descriptors.is_empty() {
            return failed(tracker, 0, NO_FILINGS_REASON.to_string());
        }

        let result = match opts.mode {
            IngestMode::Pipeline => self.run_pipeline(fetcher, descriptors),
            IngestMode::Bulk => self.run_bulk(fetcher, descriptors),
        };
        match result {
            Ok(stats) => {
                tracker.mark_completed(unit_id, stats.as_counters(discovered))?;
                info!(
                    "Unit {}: {} discovered, {} stored, {} skipped, {} errors",
                    unit_id, discovered, stats.stored, stats.skipped, stats.errors
                );
                Ok(Some(UnitReport {
                    unit_id,
                    status: UnitStatus::Completed,
                    discovered,
                    stats: Some(stats),
                    error: None,
                }))
            }
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled.into()),
            Err(e) => failed(tracker, discovered, format!("{e:#}")),
        }
    }

    fn run_pipeline(
        &self,
        fetcher: &Arc<Fetcher>,
        descriptors: Vec<FilingDescriptor>,
    ) -> Result<ProcessingStats, PipelineError> {
        let total = descriptors.len() as u64;
        let (descriptors, pre_skipped) = if self.opts.policy == WorkPolicy::Force {
            (descriptors, 0)
        } else {
            let store = Store::open(&self.opts.db_path)?;
            prefilter_existing(&store, descriptors).context("existence pre-filter")?
        };
        debug!("{} already stored; {} submitted", pre_skipped, descriptors.len());
        let coordinator = PipelineCoordinator::new(
            Arc::clone(fetcher),
            Arc::clone(&self.parser),
            &self.opts.db_path,
            PipelineConfig::from(&self.opts),
            self.cancel.clone(),
        );
        let mut stats = coordinator.run(descriptors)?;
        stats.total = total;
        stats.skipped += pre_skipped;
        Ok(stats)
    }

    fn run_bulk(
        &self,
        fetcher: &Arc<Fetcher>,
        descriptors: Vec<FilingDescriptor>,
    ) -> Result<ProcessingStats, PipelineError> {
        let orchestrator = BulkOrchestrator::new(
            Arc::clone(fetcher),
            &self.opts.db_path,
            BulkConfig::from(&self.opts),
            self.cancel.clone(),
        )?;
        orchestrator.run(descriptors)
    }
}
