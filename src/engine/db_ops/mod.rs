//! Durable store: schema, connection setup, filing upserts, progress rows.

mod connection;
mod filings;
mod units;

pub use connection::{Store, TableCounts, open_connection};
pub use filings::{BatchStats, StoreOutcome, StoredFiling};
pub use units::{delete_unit, load_unit, load_units, upsert_unit};

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

/// Filings keyed by accession number, plus the entities they reference and per-unit progress.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS companies (
    cik TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    ticker TEXT,
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS insiders (
    cik TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS filings (
    accession_number TEXT PRIMARY KEY CHECK (length(accession_number) > 0),
    filing_date TEXT NOT NULL,
    company_cik TEXT NOT NULL,
    form_type TEXT NOT NULL,
    url TEXT NOT NULL,
    document_type TEXT,
    period_of_report TEXT,
    owner_cik TEXT,
    owner_name TEXT,
    owner_relationship TEXT,
    transaction_count INTEGER,
    content TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    stored_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_filings_date ON filings(filing_date);
CREATE INDEX IF NOT EXISTS idx_filings_company ON filings(company_cik);

CREATE TABLE IF NOT EXISTS ingestion_units (
    unit_id INTEGER PRIMARY KEY,
    status TEXT NOT NULL,
    discovered INTEGER NOT NULL DEFAULT 0,
    downloaded INTEGER NOT NULL DEFAULT 0,
    stored INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    completed_at TEXT,
    last_updated TEXT NOT NULL,
    error_message TEXT
);
"#;
