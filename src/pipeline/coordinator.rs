//! Three-stage run: `idle → running → draining → stopped`.

use chrono::Utc;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::engine::db_ops::Store;
use crate::engine::fetch::Fetcher;
use crate::engine::parser::FilingParser;
use crate::engine::progress::{finish_bar, maybe_bar};
use crate::engine::signal::StopSignal;
use crate::error::PipelineError;
use crate::types::{FilingDescriptor, ProcessingStats, capped_fetch_workers};

use super::context::{PipelineConfig, PipelineContext, PipelineStats};
use super::queue::WorkQueue;
use super::workers::{spawn_download_workers, spawn_parse_workers, spawn_store_worker};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// One-shot coordinator: build, [`run`](Self::run) once, read the stats.
pub struct PipelineCoordinator {
    fetcher: Arc<Fetcher>,
    parser: Arc<dyn FilingParser>,
    db_path: PathBuf,
    config: PipelineConfig,
    cancel: StopSignal,
    state: Mutex<CoordinatorState>,
}

/// Join every handle, waiting at most `timeout` overall. Unfinished threads are logged and detached.
fn join_with_deadline(handles: Vec<(String, JoinHandle<()>)>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let mut pending = handles;
    while !pending.is_empty() && Instant::now() < deadline {
        let (done, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|(_, h)| h.is_finished());
        for (name, h) in done {
            if h.join().is_err() {
                warn!("Worker {} panicked", name);
            }
        }
        pending = rest;
        if !pending.is_empty() {
            thread::sleep(Duration::from_millis(20));
        }
    }
    for (name, _) in &pending {
        warn!("Worker {} did not stop within {:?}", name, timeout);
    }
}

impl PipelineCoordinator {
    pub fn new(
        fetcher: Arc<Fetcher>,
        parser: Arc<dyn FilingParser>,
        db_path: &Path,
        config: PipelineConfig,
        cancel: StopSignal,
    ) -> Self {
        Self {
            fetcher,
            parser,
            db_path: db_path.to_path_buf(),
            config,
            cancel,
            state: Mutex::new(CoordinatorState::Idle),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CoordinatorState {
        *self.lock_state()
    }

    fn set_state(&self, next: CoordinatorState) {
        let mut state = self.lock_state();
        debug!("Pipeline {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// Push `descriptors` through download → parse → store and wait for the queues to drain.
    /// Returns [`PipelineError::Cancelled`] if the cancel signal was raised during the run.
    pub fn run(&self, descriptors: Vec<FilingDescriptor>) -> Result<ProcessingStats, PipelineError> {
        {
            let mut state = self.lock_state();
            if *state != CoordinatorState::Idle {
                return Err(PipelineError::AlreadyRan);
            }
            *state = CoordinatorState::Running;
        }
        let start_time = Utc::now();
        let total = descriptors.len();

        let store = match Store::open(&self.db_path) {
            Ok(s) => s,
            Err(e) => {
                self.set_state(CoordinatorState::Stopped);
                return Err(PipelineError::Other(e));
            }
        };

        let cap = self.config.queue_cap;
        let ctx = PipelineContext {
            download_q: WorkQueue::new(cap),
            parse_q: WorkQueue::new(cap),
            store_q: WorkQueue::new(cap),
            fetcher: Arc::clone(&self.fetcher),
            parser: Arc::clone(&self.parser),
            stats: Arc::new(PipelineStats::default()),
            cancel: self.cancel.clone(),
            halt: StopSignal::new(),
            config: self.config.clone(),
            bar: maybe_bar(self.config.show_progress, total, "Storing filings"),
        };

        let download_workers = capped_fetch_workers(self.config.download_workers);
        let mut handles = spawn_download_workers(&ctx, download_workers);
        handles.extend(spawn_parse_workers(&ctx, self.config.parse_workers.max(1)));
        handles.extend(spawn_store_worker(&ctx, store));
        info!(
            "Pipeline started: {} filings, {} download / {} parse workers, batch {}",
            total,
            download_workers,
            self.config.parse_workers.max(1),
            self.config.batch_size
        );

        for descriptor in descriptors {
            if self.cancel.is_raised() {
                break;
            }
            if ctx.download_q.put(descriptor, &self.cancel).is_err() {
                break;
            }
        }

        self.set_state(CoordinatorState::Draining);
        // Download workers quit on cancel, so their queue gets no grace period.
        ctx.download_q.wait_drained(&self.cancel, Duration::ZERO);
        let parse_drained = ctx
            .parse_q
            .wait_drained(&self.cancel, self.config.drain_timeout);
        let store_drained = ctx
            .store_q
            .wait_drained(&self.cancel, self.config.drain_timeout);
        if !parse_drained || !store_drained {
            warn!(
                "Shutdown before drain: {} parse / {} store items abandoned",
                ctx.parse_q.unfinished(),
                ctx.store_q.unfinished()
            );
        }

        ctx.halt.raise();
        join_with_deadline(handles, self.config.join_timeout);
        finish_bar(ctx.bar.as_ref());
        self.set_state(CoordinatorState::Stopped);

        let stats = ctx
            .stats
            .snapshot()
            .to_processing_stats(total as u64, start_time, Utc::now());
        if self.cancel.is_raised() {
            info!(
                "Pipeline cancelled: {} stored, {} skipped, {} errors before stop",
                stats.stored, stats.skipped, stats.errors
            );
            return Err(PipelineError::Cancelled);
        }
        info!(
            "Pipeline finished: {} downloaded, {} parsed, {} stored, {} skipped, {} errors",
            stats.downloaded, stats.parsed, stats.stored, stats.skipped, stats.errors
        );
        Ok(stats)
    }
}
