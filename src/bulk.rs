//! Backfill engine: existence pre-filter, then chunked concurrent fetch and batch store of raw content.

use anyhow::Context;
use chrono::Utc;
use log::{info, warn};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::db_ops::Store;
use crate::engine::fetch::Fetcher;
use crate::engine::progress::{finish_bar, maybe_bar, update_progress_bar};
use crate::engine::signal::StopSignal;
use crate::error::{FetchError, PipelineError};
use crate::types::{
    FilingDescriptor, Opts, ProcessingStats, StoreItem, WorkPolicy, capped_fetch_workers,
};
use crate::utils::config::BulkConsts;

/// Per-chunk reading of the throttle circuit breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleVerdict {
    Healthy,
    /// Over half the chunk was throttled: fewer workers would help.
    Warn,
    /// Over 80%: pause before the next chunk.
    Cooldown,
}

pub fn assess_throttling(throttled: usize, chunk_len: usize) -> ThrottleVerdict {
    if chunk_len == 0 {
        return ThrottleVerdict::Healthy;
    }
    let fraction = throttled as f64 / chunk_len as f64;
    if fraction > BulkConsts::COOLDOWN_FRACTION {
        ThrottleVerdict::Cooldown
    } else if fraction > BulkConsts::WARN_FRACTION {
        ThrottleVerdict::Warn
    } else {
        ThrottleVerdict::Healthy
    }
}

#[derive(Clone, Debug)]
pub struct BulkConfig {
    pub fetch_workers: usize,
    pub chunk_size: usize,
    pub force: bool,
    pub cooldown: Duration,
    pub show_progress: bool,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            fetch_workers: BulkConsts::FETCH_WORKERS,
            chunk_size: BulkConsts::CHUNK_SIZE,
            force: false,
            cooldown: BulkConsts::COOLDOWN,
            show_progress: false,
        }
    }
}

impl From<&Opts> for BulkConfig {
    fn from(opts: &Opts) -> Self {
        Self {
            fetch_workers: opts.fetch_workers.unwrap_or(BulkConsts::FETCH_WORKERS),
            chunk_size: opts.chunk_size.max(1),
            force: opts.policy == WorkPolicy::Force,
            show_progress: opts.verbose,
            ..Self::default()
        }
    }
}

pub struct BulkOrchestrator {
    fetcher: Arc<Fetcher>,
    db_path: PathBuf,
    config: BulkConfig,
    cancel: StopSignal,
    pool: rayon::ThreadPool,
}

impl BulkOrchestrator {
    pub fn new(
        fetcher: Arc<Fetcher>,
        db_path: &Path,
        config: BulkConfig,
        cancel: StopSignal,
    ) -> anyhow::Result<Self> {
        let workers = capped_fetch_workers(config.fetch_workers);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("bulk-fetch-{i}"))
            .build()
            .context("build fetch pool")?;
        Ok(Self {
            fetcher,
            db_path: db_path.to_path_buf(),
            config,
            cancel,
            pool,
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Fetch and store `descriptors`. Existing keys are skipped up front unless forced.
    pub fn run(
        &self,
        descriptors: Vec<FilingDescriptor>,
    ) -> Result<ProcessingStats, PipelineError> {
        let mut stats = ProcessingStats {
            total: descriptors.len() as u64,
            start_time: Some(Utc::now()),
            ..ProcessingStats::default()
        };
        let mut store = Store::open(&self.db_path)?;

        let remaining: Vec<FilingDescriptor> = if self.config.force {
            descriptors
        } else {
            let keys: Vec<String> = descriptors
                .iter()
                .map(|d| d.accession_number.clone())
                .collect();
            let existing: HashSet<String> = store.existing_keys(&keys)?;
            stats.skipped += existing.len() as u64;
            descriptors
                .into_iter()
                .filter(|d| !existing.contains(&d.accession_number))
                .collect()
        };
        info!(
            "Bulk run: {} filings, {} already stored, {} to fetch on {} workers",
            stats.total,
            stats.skipped,
            remaining.len(),
            self.workers()
        );

        let bar = maybe_bar(self.config.show_progress, remaining.len(), "Bulk fetch");
        let chunk_size = self.config.chunk_size.max(1);

        for (i, chunk) in remaining.chunks(chunk_size).enumerate() {
            if self.cancel.is_raised() {
                break;
            }
            let results: Vec<(&FilingDescriptor, Result<String, FetchError>)> =
                self.pool.install(|| {
                    chunk
                        .par_iter()
                        .map(|d| (d, self.fetcher.fetch(d, &self.cancel)))
                        .collect()
                });

            let mut items = Vec::with_capacity(chunk.len());
            let mut throttled = 0_usize;
            for (d, result) in results {
                match result {
                    Ok(content) => {
                        stats.downloaded += 1;
                        items.push(StoreItem {
                            descriptor: d.clone(),
                            content,
                            record: None,
                        });
                    }
                    Err(e) => {
                        if matches!(e, FetchError::Throttled { .. }) {
                            throttled += 1;
                            stats.throttled += 1;
                        }
                        if e.kind().is_counted() {
                            stats.errors += 1;
                        }
                    }
                }
            }

            let batch = store.store_batch(&items, self.config.force);
            stats.stored += batch.stored;
            stats.skipped += batch.skipped;
            stats.errors += batch.errors;
            if let Some(ref bar) = bar {
                update_progress_bar(bar, chunk.len());
            }

            match assess_throttling(throttled, chunk.len()) {
                ThrottleVerdict::Healthy => {}
                ThrottleVerdict::Warn => warn!(
                    "Chunk {}: {}/{} throttled; consider fewer workers (now {})",
                    i + 1,
                    throttled,
                    chunk.len(),
                    self.workers()
                ),
                ThrottleVerdict::Cooldown => {
                    warn!(
                        "Chunk {}: {}/{} throttled; cooling down for {:?}",
                        i + 1,
                        throttled,
                        chunk.len(),
                        self.config.cooldown
                    );
                    if !self.cancel.sleep(self.config.cooldown) {
                        break;
                    }
                }
            }
        }

        finish_bar(bar.as_ref());
        if let Err(e) = store.checkpoint() {
            warn!("WAL checkpoint after bulk run failed: {:#}", e);
        }
        stats.end_time = Some(Utc::now());
        if self.cancel.is_raised() {
            return Err(PipelineError::Cancelled);
        }
        info!(
            "Bulk run finished: {} downloaded, {} stored, {} skipped, {} errors ({} throttled)",
            stats.downloaded, stats.stored, stats.skipped, stats.errors, stats.throttled
        );
        Ok(stats)
    }
}
