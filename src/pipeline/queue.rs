//! Bounded FIFO with per-item acknowledgement, so "drained" means handed off, not just dequeued.

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::signal::StopSignal;
use crate::utils::config::PipelineConsts;

const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Clone to share between producers and consumers. `unfinished` counts items put and not yet
/// acknowledged with [`task_done`](Self::task_done).
pub struct WorkQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    unfinished: Arc<AtomicUsize>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            unfinished: Arc::clone(&self.unfinished),
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new(cap: usize) -> Self {
        let (tx, rx) = bounded(cap.max(1));
        Self {
            tx,
            rx,
            unfinished: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Block while full. Gives the item back if `abort` is raised first.
    pub fn put(&self, item: T, abort: &StopSignal) -> Result<(), T> {
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        let mut item = item;
        loop {
            match self.tx.send_timeout(item, PipelineConsts::POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => {
                    if abort.is_raised() {
                        self.unfinished.fetch_sub(1, Ordering::SeqCst);
                        return Err(back);
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(back)) => {
                    self.unfinished.fetch_sub(1, Ordering::SeqCst);
                    return Err(back);
                }
            }
        }
    }

    /// Next item, or None after `timeout`.
    pub fn get(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Acknowledge one item taken with `get`.
    pub fn task_done(&self) {
        self.task_done_n(1);
    }

    pub fn task_done_n(&self, n: usize) {
        let _ = self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(n))
            });
    }

    /// Items put and not yet acknowledged (queued plus in flight).
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::SeqCst)
    }

    /// Items sitting in the channel.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Wait until every item is acknowledged. Unbounded while `cancel` is down; once it is raised
    /// the wait ends at most `grace` later. Returns true if drained.
    pub fn wait_drained(&self, cancel: &StopSignal, grace: Duration) -> bool {
        let mut deadline: Option<Instant> = None;
        loop {
            if self.unfinished() == 0 {
                return true;
            }
            if cancel.is_raised() {
                let d = *deadline.get_or_insert_with(|| Instant::now() + grace);
                if Instant::now() >= d {
                    return false;
                }
            }
            thread::sleep(DRAIN_POLL);
        }
    }
}
