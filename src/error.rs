//! Item-level error taxonomy.
//!
//! Application paths use [`anyhow`]; these enums classify a single filing's failure so the
//! stages can count, retry, or drop it without aborting their batch.

use thiserror::Error;

use crate::types::{UnitId, UnitStatus};

/// Failure classes, used for counters and the per-run summary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransientNetwork,
    Throttled,
    PermanentFetch,
    TransportError,
    ValidationError,
    ParseError,
    StorageConflict,
    StorageError,
    Cancelled,
}

impl ErrorKind {
    /// Whether this class counts toward a stage's `errors`.
    pub fn is_counted(&self) -> bool {
        !matches!(self, ErrorKind::StorageConflict | ErrorKind::Cancelled)
    }
}

/// Terminal result of a fetch that did not produce content.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeout or connection failure that persisted through every attempt.
    #[error("network error after {attempts} attempts: {message}")]
    TransientNetwork { attempts: u32, message: String },

    /// The archive kept answering 429.
    #[error("throttled by archive after {attempts} attempts")]
    Throttled { attempts: u32 },

    /// Non-2xx other than 429. Not retried.
    #[error("HTTP {status}")]
    PermanentFetch { status: u16 },

    /// Transport failure that retrying will not fix (bad URL, body decode, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload too small to be a filing.
    #[error("content too short: {len} bytes")]
    Validation { len: usize },

    /// Stop signal observed while waiting to retry.
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            FetchError::Throttled { .. } => ErrorKind::Throttled,
            FetchError::PermanentFetch { .. } => ErrorKind::PermanentFetch,
            FetchError::Transport(_) => ErrorKind::TransportError,
            FetchError::Validation { .. } => ErrorKind::ValidationError,
            FetchError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Parser rejected the content.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("parse error: {0}")]
pub struct ParseError(pub String);

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ParseError
    }
}

/// Persistence failure for one item. Never aborts the batch.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Pipeline / orchestrator run failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// External interrupt; queues were drained as far as the bounded waits allowed.
    #[error("ingestion cancelled")]
    Cancelled,

    #[error("coordinator already ran; create a new one per run")]
    AlreadyRan,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Illegal progress-state change.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("unit {unit} is {from}; cannot move to {to}")]
    Illegal {
        unit: UnitId,
        from: UnitStatus,
        to: UnitStatus,
    },

    #[error("unit {unit} is already in progress (started {started})")]
    Busy { unit: UnitId, started: String },
}

/// True if `err` is a cancellation, however it was wrapped.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<PipelineError>(),
            Some(PipelineError::Cancelled)
        )
    })
}
