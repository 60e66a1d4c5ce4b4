//! Progress rows (`ingestion_units`).

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::ops::RangeInclusive;

use crate::types::{IngestionUnit, UnitCounters, UnitId, UnitStatus};

const SELECT_UNIT: &str = "SELECT unit_id, status, discovered, downloaded, stored, errors, skipped,
        started_at, completed_at, last_updated, error_message FROM ingestion_units";

fn count(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}

fn unit_from_row(row: &Row<'_>) -> rusqlite::Result<IngestionUnit> {
    let status: String = row.get(1)?;
    let status = status.parse::<UnitStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(IngestionUnit {
        unit_id: row.get(0)?,
        status,
        counters: UnitCounters {
            discovered: count(row, 2)?,
            downloaded: count(row, 3)?,
            stored: count(row, 4)?,
            errors: count(row, 5)?,
            skipped: count(row, 6)?,
        },
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
        last_updated: row.get(9)?,
        error_message: row.get(10)?,
    })
}

pub fn load_unit(conn: &Connection, unit_id: UnitId) -> Result<Option<IngestionUnit>> {
    conn.query_row(
        &format!("{SELECT_UNIT} WHERE unit_id = ?1"),
        [unit_id],
        unit_from_row,
    )
    .optional()
    .with_context(|| format!("load unit {unit_id}"))
}

/// Units with a row, ordered by id. `None` loads all of them.
pub fn load_units(
    conn: &Connection,
    range: Option<RangeInclusive<UnitId>>,
) -> Result<Vec<IngestionUnit>> {
    let (lo, hi) = range.map_or((UnitId::MIN, UnitId::MAX), |r| (*r.start(), *r.end()));
    let mut stmt = conn
        .prepare(&format!(
            "{SELECT_UNIT} WHERE unit_id BETWEEN ?1 AND ?2 ORDER BY unit_id"
        ))
        .context("prepare load units")?;
    let rows = stmt
        .query_map([lo, hi], unit_from_row)
        .context("load units")?;
    let mut units = Vec::new();
    for unit in rows {
        units.push(unit?);
    }
    Ok(units)
}

pub fn upsert_unit(conn: &Connection, unit: &IngestionUnit) -> Result<()> {
    let c = &unit.counters;
    conn.execute(
        r#"
        INSERT INTO ingestion_units (
            unit_id, status, discovered, downloaded, stored, errors, skipped,
            started_at, completed_at, last_updated, error_message
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(unit_id) DO UPDATE SET
            status = excluded.status,
            discovered = excluded.discovered,
            downloaded = excluded.downloaded,
            stored = excluded.stored,
            errors = excluded.errors,
            skipped = excluded.skipped,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at,
            last_updated = excluded.last_updated,
            error_message = excluded.error_message
        "#,
        params![
            unit.unit_id,
            unit.status.as_str(),
            c.discovered as i64,
            c.downloaded as i64,
            c.stored as i64,
            c.errors as i64,
            c.skipped as i64,
            unit.started_at,
            unit.completed_at,
            unit.last_updated,
            unit.error_message,
        ],
    )
    .with_context(|| format!("save unit {}", unit.unit_id))?;
    Ok(())
}

/// Returns true if a row was removed.
pub fn delete_unit(conn: &Connection, unit_id: UnitId) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM ingestion_units WHERE unit_id = ?1", [unit_id])
        .with_context(|| format!("delete unit {unit_id}"))?;
    Ok(n > 0)
}
