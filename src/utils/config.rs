//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived paths: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    db_filename: String,
    config_filename: String,
    user_agent_env: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache paths from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                db_filename: format!("{pkg}.db"),
                config_filename: format!(".{pkg}.toml"),
                user_agent_env: format!("{}_USER_AGENT", pkg.to_uppercase()),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Default database filename (in the working directory).
    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }

    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Environment variable holding the identifying User-Agent.
    pub fn user_agent_env(&self) -> &str {
        &self.user_agent_env
    }
}

// ---- Archive ----

/// Remote archive locations and defaults.
pub struct ArchiveConsts;

impl ArchiveConsts {
    /// Root of the archive; manifest paths are relative to this.
    pub const ARCHIVE_BASE: &'static str = "https://www.sec.gov/Archives";
    /// Form type collected by default (insider ownership filings).
    pub const FORM_TYPE: &'static str = "4";
    /// Fallback User-Agent. The archive asks for a contact address; override it.
    pub const DEFAULT_USER_AGENT: &'static str = "edgarsync research tool admin@example.com";
    /// First year with daily indexes.
    pub const FIRST_YEAR: i32 = 1995;
}

// ---- Rate limiting ----

/// Admission control defaults.
pub struct RateLimitConsts;

impl RateLimitConsts {
    /// Requests per window (the archive allows 10/s; stay under it).
    pub const MAX_REQUESTS: usize = 8;
    pub const WINDOW: Duration = Duration::from_secs(1);
    /// Adaptive floor.
    pub const MIN_REQUESTS: usize = 1;
    /// Ceiling multiplier applied on each throttle signal.
    pub const BACKOFF_FACTOR: f64 = 0.5;
    /// Consecutive successes before the ceiling grows by one.
    pub const RECOVERY_STREAK: u32 = 10;
}

// ---- Fetching ----

/// Per-item retrieval policy defaults.
pub struct FetchConsts;

impl FetchConsts {
    pub const MAX_ATTEMPTS: u32 = 3;
    /// Delay before the first attempt is `FIRST_DELAY + uniform(0, JITTER)`.
    pub const FIRST_DELAY: Duration = Duration::from_millis(500);
    pub const JITTER: Duration = Duration::from_millis(500);
    /// Later attempts wait `RETRY_BASE * 2^attempt + FIRST_DELAY + uniform(0, JITTER)`.
    pub const RETRY_BASE: Duration = Duration::from_secs(1);
    /// After a 429: `THROTTLE_BASE * 2^attempt + THROTTLE_FLOOR + uniform(0, THROTTLE_JITTER)`.
    pub const THROTTLE_BASE: Duration = Duration::from_secs(10);
    pub const THROTTLE_FLOOR: Duration = Duration::from_secs(1);
    pub const THROTTLE_JITTER: Duration = Duration::from_secs(4);
    /// Payloads shorter than this are rejected (bytes).
    pub const MIN_CONTENT_LEN: usize = 100;
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    /// Envelope markers around the target document.
    pub const DOC_START: &'static str = "<ownershipDocument>";
    pub const DOC_END: &'static str = "</ownershipDocument>";
    /// Hard ceiling on concurrent fetch workers, whatever the caller asks for.
    pub const MAX_FETCH_WORKERS: usize = 8;
    /// Granularity of stop-aware sleeps.
    pub const SLEEP_SLICE: Duration = Duration::from_millis(100);
}

// ---- Pipeline ----

/// Three-stage pipeline tuning.
pub struct PipelineConsts;

impl PipelineConsts {
    pub const DOWNLOAD_WORKERS: usize = 2;
    pub const PARSE_WORKERS: usize = 4;
    /// Store-worker batch size (items per flush).
    pub const STORE_BATCH_SIZE: usize = 100;
    /// Capacity of each bounded queue.
    pub const QUEUE_CAP: usize = 1_000;
    /// How long a worker waits on an empty queue before re-checking the stop signal.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
    /// Store worker flushes a partial batch after this much idle time.
    pub const IDLE_FLUSH: Duration = Duration::from_secs(1);
    /// Bound on each queue-drain wait once cancelled.
    pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
    /// Bound on joining all workers at shutdown.
    pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
}

// ---- Bulk backfill ----

/// Bulk orchestrator tuning.
pub struct BulkConsts;

impl BulkConsts {
    pub const FETCH_WORKERS: usize = 6;
    /// Descriptors fetched and stored per chunk.
    pub const CHUNK_SIZE: usize = 50;
    /// Natural keys per existence query.
    pub const EXISTENCE_CHUNK: usize = 1_000;
    /// Throttled fraction above which we warn.
    pub const WARN_FRACTION: f64 = 0.5;
    /// Throttled fraction above which we cool down.
    pub const COOLDOWN_FRACTION: f64 = 0.8;
    pub const COOLDOWN: Duration = Duration::from_secs(60);
}

// ---- Progress tracking ----

pub struct TrackerConsts;

impl TrackerConsts {
    /// An `in_progress` unit older than this is considered abandoned.
    pub const STALE_AFTER_HOURS: i64 = 24;
}

// ---- Continuous mode ----

pub struct WatchConsts;

impl WatchConsts {
    /// Sleep when everything is caught up.
    pub const IDLE_SLEEP: Duration = Duration::from_secs(3_600);
    /// Sleep after a run with failures.
    pub const RETRY_SLEEP: Duration = Duration::from_secs(1_800);
    /// Sleep after a pass that errored outright.
    pub const ERROR_SLEEP: Duration = Duration::from_secs(600);
}

// ---- Database ----

/// Wait this long on a locked database before failing a statement.
pub const DB_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
