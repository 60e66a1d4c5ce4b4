//! Open the store and report table sizes.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::utils::config::DB_BUSY_TIMEOUT;

use super::{SCHEMA, WAL_PRAGMAS};

/// Enable WAL and apply schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(())
}

/// Open or create the database at `path` with WAL, busy timeout and schema.
/// Each thread that writes opens its own connection through this.
pub fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open database {}", path.display()))?;
    conn.busy_timeout(DB_BUSY_TIMEOUT)
        .context("set busy timeout")?;
    apply_wal_and_schema(&conn)?;
    Ok(conn)
}

/// Row counts for the status report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub companies: u64,
    pub insiders: u64,
    pub filings: u64,
    /// Filings stored with a parsed record.
    pub processed: u64,
    pub units: u64,
}

/// Owned connection to the filing store. Not shared across threads; clone the path instead.
pub struct Store {
    pub(super) conn: Connection,
    path: PathBuf,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: open_connection(path)?,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn counts(&self) -> Result<TableCounts> {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = self
                .conn
                .query_row(sql, [], |row| row.get(0))
                .with_context(|| format!("count: {sql}"))?;
            Ok(n.max(0) as u64)
        };
        Ok(TableCounts {
            companies: count("SELECT COUNT(*) FROM companies")?,
            insiders: count("SELECT COUNT(*) FROM insiders")?,
            filings: count("SELECT COUNT(*) FROM filings")?,
            processed: count("SELECT COUNT(*) FROM filings WHERE processed = 1")?,
            units: count("SELECT COUNT(*) FROM ingestion_units")?,
        })
    }

    /// Truncate the WAL after a long write session.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .context("WAL checkpoint")?;
        Ok(())
    }
}
