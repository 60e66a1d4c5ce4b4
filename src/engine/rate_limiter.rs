//! Sliding-window admission control shared by every fetch worker.
//!
//! [`SlidingWindowLimiter`] enforces a fixed ceiling; [`AdaptiveRateLimiter`] wraps one and moves
//! its ceiling in response to throttle signals from the archive. Both sit behind [`RateLimiter`]
//! so callers hold an `Arc<dyn RateLimiter>` and never care which one they got.

use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::types::RateLimitOpts;
use crate::utils::config::RateLimitConsts;

/// Admission capability. `admit` blocks; the queries never do.
pub trait RateLimiter: Send + Sync {
    /// Block until one more request fits in the window, then record it. Returns the recorded time.
    fn admit(&self) -> Instant;

    /// True if `admit` would return without waiting.
    fn can_admit_now(&self) -> bool;

    /// How long `admit` would wait right now (zero if it would not).
    fn time_until_next_admission(&self) -> Duration;

    /// Admissions recorded in the trailing window.
    fn current_usage(&self) -> usize;

    /// Current ceiling.
    fn current_limit(&self) -> usize;

    /// Forget recorded admissions.
    fn reset(&self);

    /// The archive answered 429. Fixed limiters ignore it.
    fn report_throttled(&self) {}

    /// A request succeeded. Fixed limiters ignore it.
    fn report_success(&self) {}
}

/// Everything guarded by the limiter mutex.
#[derive(Debug)]
struct WindowState {
    events: VecDeque<Instant>,
    max_requests: usize,
    backoff_active: bool,
    consecutive_successes: u32,
}

impl WindowState {
    fn expire(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.events.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Zero if there is room; otherwise time until the oldest event leaves the window.
    fn wait_time(&self, now: Instant, window: Duration) -> Duration {
        if self.events.len() < self.max_requests {
            return Duration::ZERO;
        }
        // Ceiling may have shrunk below the window size: wait for enough events to age out.
        let excess = self.events.len() - self.max_requests;
        self.events
            .get(excess)
            .map(|&t| (t + window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}

/// Fixed-ceiling sliding window.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    state: Mutex<WindowState>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        info!(
            "Rate limiter initialized: {} requests per {:?}",
            max_requests, window
        );
        Self {
            window,
            state: Mutex::new(WindowState {
                events: VecDeque::with_capacity(max_requests),
                max_requests: max_requests.max(1),
                backoff_active: false,
                consecutive_successes: 0,
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn admit(&self) -> Instant {
        loop {
            let wait = {
                let mut state = self.lock();
                let now = Instant::now();
                state.expire(now, self.window);
                let wait = state.wait_time(now, self.window);
                if wait.is_zero() {
                    state.events.push_back(now);
                    return now;
                }
                wait
            };
            // Lock released before sleeping; another caller may take the slot, so re-check.
            debug!("Rate limit reached, waiting {:?}", wait);
            thread::sleep(wait);
        }
    }

    fn can_admit_now(&self) -> bool {
        self.time_until_next_admission().is_zero()
    }

    fn time_until_next_admission(&self) -> Duration {
        let mut state = self.lock();
        let now = Instant::now();
        state.expire(now, self.window);
        state.wait_time(now, self.window)
    }

    fn current_usage(&self) -> usize {
        let mut state = self.lock();
        state.expire(Instant::now(), self.window);
        state.events.len()
    }

    fn current_limit(&self) -> usize {
        self.lock().max_requests
    }

    fn reset(&self) {
        self.lock().events.clear();
        info!("Rate limiter reset");
    }
}

/// Sliding window whose ceiling halves on throttle signals and creeps back on success.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    inner: SlidingWindowLimiter,
    original_max: usize,
    min_requests: usize,
    backoff_factor: f64,
    recovery_streak: u32,
}

impl AdaptiveRateLimiter {
    pub fn new(opts: &RateLimitOpts) -> Self {
        let original_max = opts.max_requests.max(1);
        Self {
            inner: SlidingWindowLimiter::new(original_max, opts.window),
            original_max,
            min_requests: opts.min_requests.clamp(1, original_max),
            backoff_factor: opts.backoff_factor,
            recovery_streak: RateLimitConsts::RECOVERY_STREAK,
        }
    }

    /// Configured ceiling the limiter recovers to.
    pub fn original_limit(&self) -> usize {
        self.original_max
    }

    pub fn is_backing_off(&self) -> bool {
        self.inner.lock().backoff_active
    }
}

impl RateLimiter for AdaptiveRateLimiter {
    fn admit(&self) -> Instant {
        self.inner.admit()
    }

    fn can_admit_now(&self) -> bool {
        self.inner.can_admit_now()
    }

    fn time_until_next_admission(&self) -> Duration {
        self.inner.time_until_next_admission()
    }

    fn current_usage(&self) -> usize {
        self.inner.current_usage()
    }

    fn current_limit(&self) -> usize {
        self.inner.current_limit()
    }

    fn reset(&self) {
        self.inner.reset()
    }

    fn report_throttled(&self) {
        let mut state = self.inner.lock();
        let old = state.max_requests;
        let reduced = (old as f64 * self.backoff_factor).floor() as usize;
        state.max_requests = reduced.max(self.min_requests);
        state.consecutive_successes = 0;
        state.backoff_active = true;
        warn!(
            "Rate limit exceeded, reducing from {} to {} requests per {:?}",
            old, state.max_requests, self.inner.window
        );
    }

    fn report_success(&self) {
        let mut state = self.inner.lock();
        if !state.backoff_active {
            return;
        }
        state.consecutive_successes += 1;
        if state.consecutive_successes < self.recovery_streak {
            return;
        }
        let old = state.max_requests;
        state.max_requests = (old + 1).min(self.original_max);
        state.consecutive_successes = 0;
        if state.max_requests >= self.original_max {
            state.backoff_active = false;
            info!("Rate limit restored to {}", self.original_max);
        } else {
            info!(
                "Rate limit increased from {} to {} requests",
                old, state.max_requests
            );
        }
    }
}
