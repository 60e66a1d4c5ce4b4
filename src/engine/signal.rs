//! Cooperative stop flag shared by the Ctrl+C handler, the coordinator and every worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::utils::config::FetchConsts;

#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `dur` in short slices. Returns false if the signal was raised first.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        loop {
            if self.is_raised() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(FetchConsts::SLEEP_SLICE));
        }
    }

    /// Install as the process Ctrl+C handler. Can only be done once per process.
    pub fn install_ctrlc(&self) -> anyhow::Result<()> {
        let flag = Arc::clone(&self.0);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow::anyhow!("set Ctrl+C handler: {e}"))
    }
}
