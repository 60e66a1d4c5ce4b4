//! Shared state handed to every pipeline worker: queues, signals, counters, tuning.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::engine::fetch::Fetcher;
use crate::engine::parser::FilingParser;
use crate::engine::progress::ProgressBar;
use crate::engine::signal::StopSignal;
use crate::types::{FilingDescriptor, Opts, ProcessingStats, StoreItem, WorkPolicy};
use crate::utils::config::PipelineConsts;

use super::queue::WorkQueue;

/// Worker counts, batch size and shutdown bounds for one coordinator.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub download_workers: usize,
    pub parse_workers: usize,
    pub batch_size: usize,
    pub queue_cap: usize,
    /// Overwrite existing filings instead of skipping them.
    pub force: bool,
    pub idle_flush: Duration,
    pub drain_timeout: Duration,
    pub join_timeout: Duration,
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_workers: PipelineConsts::DOWNLOAD_WORKERS,
            parse_workers: PipelineConsts::PARSE_WORKERS,
            batch_size: PipelineConsts::STORE_BATCH_SIZE,
            queue_cap: PipelineConsts::QUEUE_CAP,
            force: false,
            idle_flush: PipelineConsts::IDLE_FLUSH,
            drain_timeout: PipelineConsts::DRAIN_TIMEOUT,
            join_timeout: PipelineConsts::JOIN_TIMEOUT,
            show_progress: false,
        }
    }
}

impl From<&Opts> for PipelineConfig {
    fn from(opts: &Opts) -> Self {
        Self {
            download_workers: opts
                .fetch_workers
                .unwrap_or(PipelineConsts::DOWNLOAD_WORKERS),
            parse_workers: opts.parse_workers.max(1),
            batch_size: opts.batch_size.max(1),
            force: opts.policy == WorkPolicy::Force,
            show_progress: opts.verbose,
            ..Self::default()
        }
    }
}

/// Per-stage counters, updated lock-free by the workers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub downloaded: AtomicU64,
    pub download_errors: AtomicU64,
    pub throttled: AtomicU64,
    pub parsed: AtomicU64,
    pub parse_errors: AtomicU64,
    pub stored: AtomicU64,
    pub skipped: AtomicU64,
    pub store_errors: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`], split by stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub downloaded: u64,
    pub download_errors: u64,
    pub throttled: u64,
    pub parsed: u64,
    pub parse_errors: u64,
    pub stored: u64,
    pub skipped: u64,
    pub store_errors: u64,
}

impl PipelineStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StageCounts {
        let get = |c: &AtomicU64| c.load(Ordering::SeqCst);
        StageCounts {
            downloaded: get(&self.downloaded),
            download_errors: get(&self.download_errors),
            throttled: get(&self.throttled),
            parsed: get(&self.parsed),
            parse_errors: get(&self.parse_errors),
            stored: get(&self.stored),
            skipped: get(&self.skipped),
            store_errors: get(&self.store_errors),
        }
    }
}

impl StageCounts {
    pub fn to_processing_stats(
        self,
        total: u64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> ProcessingStats {
        ProcessingStats {
            total,
            downloaded: self.downloaded,
            parsed: self.parsed,
            stored: self.stored,
            skipped: self.skipped,
            errors: self.download_errors + self.parse_errors + self.store_errors,
            throttled: self.throttled,
            start_time: Some(start_time),
            end_time: Some(end_time),
        }
    }
}

/// Parsed item on its way to the store worker.
pub type ParsedItem = StoreItem;
/// Downloaded content on its way to a parse worker.
pub type FetchedItem = (FilingDescriptor, String);

/// Everything a worker needs. Cloned once per spawned thread.
#[derive(Clone)]
pub struct PipelineContext {
    pub download_q: WorkQueue<FilingDescriptor>,
    pub parse_q: WorkQueue<FetchedItem>,
    pub store_q: WorkQueue<ParsedItem>,
    pub fetcher: Arc<Fetcher>,
    pub parser: Arc<dyn FilingParser>,
    pub stats: Arc<PipelineStats>,
    /// External interrupt: download workers stop taking work, fetch sleeps abort.
    pub cancel: StopSignal,
    /// Raised by the coordinator after draining: every worker exits.
    pub halt: StopSignal,
    pub config: PipelineConfig,
    pub bar: Option<ProgressBar>,
}
