//! Public and internal types for the edgarsync API and pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::config::{
    ArchiveConsts, BulkConsts, FetchConsts, PipelineConsts, RateLimitConsts, TrackerConsts,
};

/// One unit of work: a single filing listed in a daily manifest. Never mutated after discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FilingDescriptor {
    /// Natural key, e.g. `0001209191-23-000123`.
    pub accession_number: String,
    /// Absolute URL of the full submission text.
    pub url: String,
    /// Subject company CIK, zero-padded to 10 digits.
    pub company_cik: String,
    pub company_name: String,
    pub filing_date: NaiveDate,
    /// Raw form-type tag as listed in the manifest.
    pub form_type: String,
}

/// Issuer block of an ownership document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IssuerInfo {
    pub cik: Option<String>,
    pub name: Option<String>,
    pub trading_symbol: Option<String>,
}

/// Reporting-owner block of an ownership document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportingOwner {
    pub cik: Option<String>,
    pub name: Option<String>,
    /// e.g. `Officer (CFO), Director`.
    pub relationship: Option<String>,
}

/// Normalized parser output for one filing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructuredRecord {
    pub accession_number: String,
    pub document_type: String,
    pub period_of_report: Option<NaiveDate>,
    pub issuer: IssuerInfo,
    pub reporting_owner: ReportingOwner,
    pub transaction_count: usize,
}

/// One item handed to the store stage. Bulk backfill stores raw content without a record.
#[derive(Clone, Debug)]
pub struct StoreItem {
    pub descriptor: FilingDescriptor,
    pub content: String,
    pub record: Option<StructuredRecord>,
}

/// Ingestion unit identifier: a calendar year.
pub type UnitId = i32;

/// Lifecycle of an ingestion unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::InProgress => "in_progress",
            UnitStatus::Completed => "completed",
            UnitStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UnitStatus::Pending),
            "in_progress" => Ok(UnitStatus::InProgress),
            "completed" => Ok(UnitStatus::Completed),
            "failed" => Ok(UnitStatus::Failed),
            other => Err(anyhow::anyhow!("unknown unit status: {other}")),
        }
    }
}

/// Persisted per-unit counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UnitCounters {
    pub discovered: u64,
    pub downloaded: u64,
    pub stored: u64,
    pub errors: u64,
    pub skipped: u64,
}

/// One row of the progress table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IngestionUnit {
    pub unit_id: UnitId,
    pub status: UnitStatus,
    pub counters: UnitCounters,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl IngestionUnit {
    /// A fresh `pending` unit with no history.
    pub fn pending(unit_id: UnitId, now: DateTime<Utc>) -> Self {
        Self {
            unit_id,
            status: UnitStatus::Pending,
            counters: UnitCounters::default(),
            started_at: None,
            completed_at: None,
            last_updated: now,
            error_message: None,
        }
    }

    /// True if `in_progress` and started longer than `stale_after` before `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        self.status == UnitStatus::InProgress
            && self
                .started_at
                .is_none_or(|started| now.signed_duration_since(started) > stale_after)
    }
}

/// Which units a run selects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WorkPolicy {
    /// Units with no record, `pending`, `failed`, or stale `in_progress`.
    #[default]
    Incremental,
    /// Every unit in range.
    Force,
}

/// Which engine processes a unit's descriptors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IngestMode {
    /// Three-stage fetch → parse → store pipeline.
    #[default]
    Pipeline,
    /// Chunked fetch + batch store for large backfills (raw content, no parse).
    Bulk,
}

/// Aggregate counters for one coordinator or orchestrator run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub total: u64,
    pub downloaded: u64,
    pub parsed: u64,
    pub stored: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Subset of `errors` that ended as `Throttled`.
    pub throttled: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ProcessingStats {
    /// Counters to persist on the unit (discovered is filled by the caller).
    pub fn as_counters(&self, discovered: u64) -> UnitCounters {
        UnitCounters {
            discovered,
            downloaded: self.downloaded,
            stored: self.stored,
            errors: self.errors,
            skipped: self.skipped,
        }
    }

    pub fn elapsed(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(s), Some(e)) => Some(e - s),
            _ => None,
        }
    }
}

/// Adaptive limiter settings.
#[derive(Clone, Debug)]
pub struct RateLimitOpts {
    pub max_requests: usize,
    pub window: Duration,
    pub min_requests: usize,
    pub backoff_factor: f64,
}

impl Default for RateLimitOpts {
    fn default() -> Self {
        Self {
            max_requests: RateLimitConsts::MAX_REQUESTS,
            window: RateLimitConsts::WINDOW,
            min_requests: RateLimitConsts::MIN_REQUESTS,
            backoff_factor: RateLimitConsts::BACKOFF_FACTOR,
        }
    }
}

/// Full options (CLI, config file, lib).
#[derive(Clone, Debug)]
pub struct Opts {
    /// SQLite database path. Default: `edgarsync.db` in the working directory.
    pub db_path: PathBuf,
    /// First and last unit (inclusive).
    pub start_year: UnitId,
    pub end_year: UnitId,
    pub policy: WorkPolicy,
    pub mode: IngestMode,
    /// Archive root (manifests and documents live under it).
    pub archive_base: String,
    pub form_type: String,
    pub user_agent: String,
    pub rate_limit: RateLimitOpts,
    /// Download workers (pipeline) or fetch pool size (bulk); capped at [`FetchConsts::MAX_FETCH_WORKERS`].
    /// None = the mode's own default.
    pub fetch_workers: Option<usize>,
    pub parse_workers: usize,
    pub batch_size: usize,
    pub chunk_size: usize,
    pub stale_after_hours: i64,
    /// Cap on descriptors per unit (testing aid). None = all.
    pub max_filings: Option<usize>,
    /// Show progress bars and debug logs.
    pub verbose: bool,
}

impl Default for Opts {
    fn default() -> Self {
        let this_year = chrono::Datelike::year(&Utc::now());
        Self {
            db_path: PathBuf::from(crate::utils::config::PackagePaths::get().db_filename()),
            start_year: ArchiveConsts::FIRST_YEAR,
            end_year: this_year,
            policy: WorkPolicy::Incremental,
            mode: IngestMode::Pipeline,
            archive_base: ArchiveConsts::ARCHIVE_BASE.to_string(),
            form_type: ArchiveConsts::FORM_TYPE.to_string(),
            user_agent: ArchiveConsts::DEFAULT_USER_AGENT.to_string(),
            rate_limit: RateLimitOpts::default(),
            fetch_workers: None,
            parse_workers: PipelineConsts::PARSE_WORKERS,
            batch_size: PipelineConsts::STORE_BATCH_SIZE,
            chunk_size: BulkConsts::CHUNK_SIZE,
            stale_after_hours: TrackerConsts::STALE_AFTER_HOURS,
            max_filings: None,
            verbose: false,
        }
    }
}

/// Clamp a requested worker count to `1..=MAX_FETCH_WORKERS`, warning when capped.
pub fn capped_fetch_workers(requested: usize) -> usize {
    if requested > FetchConsts::MAX_FETCH_WORKERS {
        log::warn!(
            "Fetch workers capped at {} to stay under the archive rate limit (requested: {})",
            FetchConsts::MAX_FETCH_WORKERS,
            requested
        );
        FetchConsts::MAX_FETCH_WORKERS
    } else {
        requested.max(1)
    }
}
