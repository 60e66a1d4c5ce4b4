//! Progress bars for the store stage and bulk chunks (verbose mode only).

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

pub type ProgressBar = Arc<Mutex<Bar>>;

/// Configuration for creating a progress bar
pub struct ProgressBarConfig {
    pub total: usize,
    pub desc: String,
    pub unit: &'static str,
    pub animation: Animation,
}

impl ProgressBarConfig {
    pub fn new(total: usize, desc: impl Into<String>) -> Self {
        Self {
            total,
            desc: desc.into(),
            unit: " filings",
            animation: Animation::Classic,
        }
    }
}

pub fn create_progress_bar(config: ProgressBarConfig) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = config.total,
        desc = config.desc,
        animation = config.animation,
        unit = config.unit
    )))
}

/// `Some(bar)` when `show` is set.
pub fn maybe_bar(show: bool, total: usize, desc: impl Into<String>) -> Option<ProgressBar> {
    show.then(|| create_progress_bar(ProgressBarConfig::new(total, desc)))
}

/// Advance by `n`. Uses try_lock so workers never block on the display.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) {
    if let Ok(mut pb) = pb.try_lock() {
        let _ = pb.update(n);
    }
}

/// Final refresh and newline so log lines don't land on the bar.
pub fn finish_bar(pb: Option<&ProgressBar>) {
    if let Some(pb) = pb
        && let Ok(mut bar) = pb.lock()
    {
        let _ = bar.refresh();
        eprintln!();
    }
}
