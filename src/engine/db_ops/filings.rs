//! Filing persistence: existence checks and batched, fault-isolated upserts.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, error, warn};
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use std::collections::HashSet;

use crate::StoreItem;
use crate::error::{ErrorKind, StorageError};
use crate::utils::config::BulkConsts;

use super::Store;

const INSERT_FILING_SQL: &str = r#"
INSERT INTO filings (
    accession_number, filing_date, company_cik, form_type, url,
    document_type, period_of_report, owner_cik, owner_name, owner_relationship,
    transaction_count, content, processed, stored_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
"#;

const UPSERT_FILING_SUFFIX: &str = r#"
ON CONFLICT(accession_number) DO UPDATE SET
    filing_date = excluded.filing_date,
    company_cik = excluded.company_cik,
    form_type = excluded.form_type,
    url = excluded.url,
    document_type = excluded.document_type,
    period_of_report = excluded.period_of_report,
    owner_cik = excluded.owner_cik,
    owner_name = excluded.owner_name,
    owner_relationship = excluded.owner_relationship,
    transaction_count = excluded.transaction_count,
    content = excluded.content,
    processed = excluded.processed,
    stored_at = excluded.stored_at
"#;

const UPSERT_COMPANY_SQL: &str = r#"
INSERT INTO companies (cik, name, ticker, last_updated) VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(cik) DO UPDATE SET
    name = excluded.name,
    ticker = COALESCE(excluded.ticker, companies.ticker),
    last_updated = excluded.last_updated
"#;

const UPSERT_INSIDER_SQL: &str = r#"
INSERT INTO insiders (cik, name, last_updated) VALUES (?1, ?2, ?3)
ON CONFLICT(cik) DO UPDATE SET name = excluded.name, last_updated = excluded.last_updated
"#;

/// What happened to one item in a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    /// Key existed and `force` was set.
    Overwritten,
    /// Key existed; left untouched.
    Skipped,
    /// Lost a race on the natural key (constraint violation). Counted as skipped.
    Duplicate,
    Failed,
}

/// Per-batch tally. `outcomes[i]` belongs to `items[i]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub stored: u64,
    pub skipped: u64,
    pub errors: u64,
    pub outcomes: Vec<StoreOutcome>,
}

impl StoreOutcome {
    /// Failure class, if this outcome is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            StoreOutcome::Duplicate => Some(ErrorKind::StorageConflict),
            StoreOutcome::Failed => Some(ErrorKind::StorageError),
            StoreOutcome::Inserted | StoreOutcome::Overwritten | StoreOutcome::Skipped => None,
        }
    }
}

impl BatchStats {
    fn record(&mut self, outcome: StoreOutcome) {
        match outcome {
            StoreOutcome::Inserted | StoreOutcome::Overwritten => self.stored += 1,
            _ if outcome.kind().is_some_and(|k| k.is_counted()) => self.errors += 1,
            _ => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Row read back by natural key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFiling {
    pub accession_number: String,
    pub filing_date: NaiveDate,
    pub company_cik: String,
    pub form_type: String,
    pub document_type: Option<String>,
    pub owner_cik: Option<String>,
    pub transaction_count: Option<i64>,
    pub content: String,
    pub processed: bool,
    pub stored_at: DateTime<Utc>,
}

fn is_key_conflict(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        ),
        _ => false,
    }
}

fn key_exists(conn: &Connection, accession: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM filings WHERE accession_number = ?1",
        [accession],
        |_| Ok(()),
    )
    .optional()
    .map(|r| r.is_some())
}

/// Write one item. Caller wraps this in a savepoint.
fn write_item(
    conn: &Connection,
    item: &StoreItem,
    force: bool,
    now: DateTime<Utc>,
) -> std::result::Result<StoreOutcome, StorageError> {
    let d = &item.descriptor;
    let existed = key_exists(conn, &d.accession_number)?;
    if existed && !force {
        return Ok(StoreOutcome::Skipped);
    }

    let rec = item.record.as_ref();
    let sql = if force {
        format!("{INSERT_FILING_SQL}{UPSERT_FILING_SUFFIX}")
    } else {
        INSERT_FILING_SQL.to_string()
    };
    conn.prepare_cached(&sql)?.execute(params![
        d.accession_number,
        d.filing_date,
        d.company_cik,
        d.form_type,
        d.url,
        rec.map(|r| r.document_type.as_str()),
        rec.and_then(|r| r.period_of_report),
        rec.and_then(|r| r.reporting_owner.cik.as_deref()),
        rec.and_then(|r| r.reporting_owner.name.as_deref()),
        rec.and_then(|r| r.reporting_owner.relationship.as_deref()),
        rec.map(|r| r.transaction_count as i64),
        item.content,
        rec.is_some(),
        now,
    ])?;

    let ticker = rec.and_then(|r| r.issuer.trading_symbol.as_deref());
    let company_name = rec
        .and_then(|r| r.issuer.name.as_deref())
        .unwrap_or(d.company_name.as_str());
    conn.prepare_cached(UPSERT_COMPANY_SQL)?
        .execute(params![d.company_cik, company_name, ticker, now])?;

    if let Some(owner) = rec.map(|r| &r.reporting_owner)
        && let (Some(cik), Some(name)) = (owner.cik.as_deref(), owner.name.as_deref())
    {
        conn.prepare_cached(UPSERT_INSIDER_SQL)?
            .execute(params![cik, name, now])?;
    }

    Ok(if existed {
        StoreOutcome::Overwritten
    } else {
        StoreOutcome::Inserted
    })
}

/// Savepoint per item: a failing item rolls back alone and the rest of the batch commits.
fn write_in_savepoint(
    tx: &mut Transaction<'_>,
    item: &StoreItem,
    force: bool,
    now: DateTime<Utc>,
) -> StoreOutcome {
    let accession = &item.descriptor.accession_number;
    let sp = match tx.savepoint() {
        Ok(sp) => sp,
        Err(e) => {
            error!("Savepoint failed for {}: {}", accession, e);
            return StoreOutcome::Failed;
        }
    };
    match write_item(&sp, item, force, now) {
        Ok(outcome) => match sp.commit() {
            Ok(()) => outcome,
            Err(e) => {
                error!("Release savepoint failed for {}: {}", accession, e);
                StoreOutcome::Failed
            }
        },
        // Dropping `sp` rolls it back.
        Err(StorageError::Sqlite(e)) if is_key_conflict(&e) => {
            debug!("Duplicate filing {} (concurrent insert)", accession);
            StoreOutcome::Duplicate
        }
        Err(e) => {
            warn!("Failed to store {}: {}", accession, e);
            StoreOutcome::Failed
        }
    }
}

impl Store {
    /// Read one filing by accession number.
    pub fn lookup(&self, accession: &str) -> Result<Option<StoredFiling>> {
        self.conn
            .query_row(
                "SELECT accession_number, filing_date, company_cik, form_type, document_type,
                        owner_cik, transaction_count, content, processed, stored_at
                 FROM filings WHERE accession_number = ?1",
                [accession],
                |row| {
                    Ok(StoredFiling {
                        accession_number: row.get(0)?,
                        filing_date: row.get(1)?,
                        company_cik: row.get(2)?,
                        form_type: row.get(3)?,
                        document_type: row.get(4)?,
                        owner_cik: row.get(5)?,
                        transaction_count: row.get(6)?,
                        content: row.get(7)?,
                        processed: row.get(8)?,
                        stored_at: row.get(9)?,
                    })
                },
            )
            .optional()
            .context("lookup filing")
    }

    /// Subset of `keys` already stored. Queries in chunks to stay under SQLite's parameter limit.
    pub fn existing_keys(&self, keys: &[String]) -> Result<HashSet<String>> {
        let mut found = HashSet::new();
        for chunk in keys.chunks(BulkConsts::EXISTENCE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT accession_number FROM filings WHERE accession_number IN ({placeholders})"
            );
            let mut stmt = self.conn.prepare(&sql).context("prepare existence check")?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))
                .context("existence check")?;
            for key in rows {
                found.insert(key?);
            }
        }
        Ok(found)
    }

    /// Persist `items` in one transaction with per-item isolation. Existing keys are skipped
    /// unless `force`. Never fails as a whole: a failed commit counts every item as an error.
    pub fn store_batch(&mut self, items: &[StoreItem], force: bool) -> BatchStats {
        let mut stats = BatchStats::default();
        if items.is_empty() {
            return stats;
        }
        let now = Utc::now();
        let mut tx = match self.conn.transaction() {
            Ok(tx) => tx,
            Err(e) => {
                error!("Begin transaction failed: {}", e);
                return failed_batch(items.len());
            }
        };
        for item in items {
            let outcome = write_in_savepoint(&mut tx, item, force, now);
            stats.record(outcome);
        }
        if let Err(e) = tx.commit() {
            error!("Commit failed for batch of {}: {}", items.len(), e);
            return failed_batch(items.len());
        }
        debug!(
            "Stored batch: {} stored, {} skipped, {} errors",
            stats.stored, stats.skipped, stats.errors
        );
        stats
    }
}

fn failed_batch(n: usize) -> BatchStats {
    BatchStats {
        stored: 0,
        skipped: 0,
        errors: n as u64,
        outcomes: vec![StoreOutcome::Failed; n],
    }
}
