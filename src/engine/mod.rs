//! Engine: admission control, fetching, parsing, storage, progress tracking, CLI handlers.

pub mod arg_parser;
pub mod db_ops;
pub mod fetch;
pub mod handlers;
pub mod parser;
pub mod progress;
pub mod rate_limiter;
pub mod signal;
pub mod tracker;

// Re-export commonly used items
pub use arg_parser::{Cli, Commands, CommonArgs, RunArgs};
pub use db_ops::{BatchStats, Store, StoreOutcome};
pub use fetch::{FetchPolicy, Fetcher, HttpTransport, Transport, TransportError, TransportResponse};
pub use handlers::{
    WatchPauses, dispatch, handle_reset, handle_run, handle_status, handle_watch, watch_loop,
};
pub use parser::{FilingParser, OwnershipParser};
pub use rate_limiter::{AdaptiveRateLimiter, RateLimiter, SlidingWindowLimiter};
pub use signal::StopSignal;
pub use tracker::{ProgressTracker, UnitPatch};
