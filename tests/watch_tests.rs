use anyhow::anyhow;
use edgarsync::engine::{StopSignal, WatchPauses, watch_loop};
use edgarsync::{PipelineError, RunReport};
use std::time::Duration;

fn no_pauses() -> WatchPauses {
    WatchPauses {
        idle: Duration::ZERO,
        retry: Duration::ZERO,
        error: Duration::ZERO,
    }
}

#[test]
fn erroring_pass_is_retried() {
    let stop = StopSignal::new();
    let mut firsts = Vec::new();
    watch_loop(&stop, no_pauses(), |first| {
        firsts.push(first);
        match firsts.len() {
            1 => Err(anyhow!("archive unreachable")),
            2 => Ok(RunReport::default()),
            _ => {
                stop.raise();
                Ok(RunReport::default())
            }
        }
    });
    assert_eq!(firsts, vec![true, false, false]);
}

#[test]
fn cancelled_report_ends_watch() {
    let stop = StopSignal::new();
    let mut passes = 0;
    watch_loop(&stop, no_pauses(), |_| {
        passes += 1;
        Ok(RunReport {
            cancelled: true,
            ..RunReport::default()
        })
    });
    assert_eq!(passes, 1);
}

#[test]
fn cancellation_error_ends_watch() {
    let stop = StopSignal::new();
    let mut passes = 0;
    watch_loop(&stop, no_pauses(), |_| {
        passes += 1;
        Err(PipelineError::Cancelled.into())
    });
    assert_eq!(passes, 1);
}

#[test]
fn default_pauses() {
    let p = WatchPauses::default();
    assert_eq!(p.error, Duration::from_secs(600));
    assert!(p.idle > p.retry);
}
