//! edgarsync: resumable, rate-limited ingestion of SEC EDGAR filings into SQLite.
//!
//! Work is split into yearly units tracked in the database. Each unit's filings are discovered
//! from the daily index and pushed through either the per-item [`pipeline`] or the [`bulk`]
//! backfill engine; both share one [`RateLimiter`](engine::RateLimiter) and the same
//! dedup/upsert store.

pub mod bulk;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use error::{ErrorKind, FetchError, ParseError, PipelineError, StorageError, TransitionError};
pub use ingest::{Ingestor, RunReport, UnitReport};

/// Result alias used by the public edgarsync API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Run one incremental (or forced) pass over `opts`' year range with the HTTP transport and the
/// ownership parser. `stop` is polled throughout; raise it to cancel.
///
/// ```ignore
/// let opts = edgarsync::Opts { start_year: 2023, end_year: 2023, ..Default::default() };
/// let report = edgarsync::ingest_range(opts, edgarsync::engine::StopSignal::new())?;
/// println!("{} stored", report.totals().stored);
/// ```
pub fn ingest_range(opts: Opts, stop: engine::StopSignal) -> Result<RunReport> {
    log::debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        opts
    );
    Ingestor::from_opts(opts, stop)?.run()
}
