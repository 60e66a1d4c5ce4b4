//! Persisted per-unit state machine: `pending → in_progress → {completed, failed}`.
//!
//! `failed` and stale `in_progress` units may be started again. The tracker remembers which
//! units this process started so an interrupt can mark exactly those `failed` before exit.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::path::Path;

use crate::engine::db_ops::{delete_unit, load_unit, load_units, open_connection, upsert_unit};
use crate::error::TransitionError;
use crate::types::{IngestionUnit, UnitCounters, UnitId, UnitStatus, WorkPolicy};

/// Partial update of one progress row. `None` fields are left as stored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnitPatch {
    pub status: Option<UnitStatus>,
    pub discovered: Option<u64>,
    pub downloaded: Option<u64>,
    pub stored: Option<u64>,
    pub errors: Option<u64>,
    pub skipped: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Clear `error_message` and `completed_at` (used when a unit restarts).
    pub clear_outcome: bool,
}

impl UnitPatch {
    pub fn status(status: UnitStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Set every counter from `c`.
    pub fn with_counters(mut self, c: UnitCounters) -> Self {
        self.discovered = Some(c.discovered);
        self.downloaded = Some(c.downloaded);
        self.stored = Some(c.stored);
        self.errors = Some(c.errors);
        self.skipped = Some(c.skipped);
        self
    }

    pub fn apply(&self, unit: &mut IngestionUnit, now: DateTime<Utc>) {
        if let Some(s) = self.status {
            unit.status = s;
        }
        let c = &mut unit.counters;
        if let Some(v) = self.discovered {
            c.discovered = v;
        }
        if let Some(v) = self.downloaded {
            c.downloaded = v;
        }
        if let Some(v) = self.stored {
            c.stored = v;
        }
        if let Some(v) = self.errors {
            c.errors = v;
        }
        if let Some(v) = self.skipped {
            c.skipped = v;
        }
        if self.clear_outcome {
            unit.completed_at = None;
            unit.error_message = None;
        }
        if let Some(t) = self.started_at {
            unit.started_at = Some(t);
        }
        if let Some(t) = self.completed_at {
            unit.completed_at = Some(t);
        }
        if let Some(ref m) = self.error_message {
            unit.error_message = Some(m.clone());
        }
        unit.last_updated = now;
    }
}

/// Owns its own connection to the store; used from the run's control thread only.
pub struct ProgressTracker {
    conn: Connection,
    stale_after: chrono::Duration,
    active: BTreeSet<UnitId>,
}

impl ProgressTracker {
    pub fn open(db_path: &Path, stale_after_hours: i64) -> Result<Self> {
        Ok(Self {
            conn: open_connection(db_path)?,
            stale_after: chrono::Duration::hours(stale_after_hours),
            active: BTreeSet::new(),
        })
    }

    pub fn unit(&self, unit_id: UnitId) -> Result<Option<IngestionUnit>> {
        load_unit(&self.conn, unit_id)
    }

    /// Stored rows in `range` (all rows if `None`).
    pub fn units(&self, range: Option<RangeInclusive<UnitId>>) -> Result<Vec<IngestionUnit>> {
        load_units(&self.conn, range)
    }

    /// Units this process moved to `in_progress` and has not finished.
    pub fn active_units(&self) -> Vec<UnitId> {
        self.active.iter().copied().collect()
    }

    pub fn units_needing_work(
        &self,
        range: RangeInclusive<UnitId>,
        policy: WorkPolicy,
    ) -> Result<Vec<UnitId>> {
        self.units_needing_work_at(range, policy, Utc::now())
    }

    /// [`units_needing_work`](Self::units_needing_work) evaluated at `now`.
    pub fn units_needing_work_at(
        &self,
        range: RangeInclusive<UnitId>,
        policy: WorkPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<UnitId>> {
        if policy == WorkPolicy::Force {
            return Ok(range.collect());
        }
        let stored = load_units(&self.conn, Some(range.clone()))?;
        let mut needed = Vec::new();
        let mut rows = stored.iter().peekable();
        for id in range {
            let row = match rows.peek() {
                Some(u) if u.unit_id == id => rows.next(),
                _ => None,
            };
            let wanted = match row {
                None => true,
                Some(u) => match u.status {
                    UnitStatus::Pending | UnitStatus::Failed => true,
                    UnitStatus::InProgress => u.is_stale(now, self.stale_after),
                    UnitStatus::Completed => false,
                },
            };
            if wanted {
                needed.push(id);
            }
        }
        Ok(needed)
    }

    /// Load-or-create the row, apply `patch`, save. One transaction.
    pub fn update(&mut self, unit_id: UnitId, patch: &UnitPatch) -> Result<IngestionUnit> {
        let now = Utc::now();
        let tx = self.conn.transaction().context("begin transaction")?;
        let mut unit =
            load_unit(&tx, unit_id)?.unwrap_or_else(|| IngestionUnit::pending(unit_id, now));
        patch.apply(&mut unit, now);
        upsert_unit(&tx, &unit)?;
        tx.commit().context("commit unit update")?;
        Ok(unit)
    }

    /// Move a unit to `in_progress`. Under [`WorkPolicy::Force`] any previous row is discarded first;
    /// otherwise a fresh (non-stale) `in_progress` or a `completed` unit is rejected.
    pub fn mark_started(&mut self, unit_id: UnitId, policy: WorkPolicy) -> Result<IngestionUnit> {
        let now = Utc::now();
        let tx = self.conn.transaction().context("begin transaction")?;
        let existing = if policy == WorkPolicy::Force {
            delete_unit(&tx, unit_id)?;
            None
        } else {
            load_unit(&tx, unit_id)?
        };
        if let Some(ref u) = existing {
            match u.status {
                UnitStatus::Pending | UnitStatus::Failed => {}
                UnitStatus::InProgress if u.is_stale(now, self.stale_after) => {
                    warn!(
                        "Unit {} was left in progress since {:?}; restarting",
                        unit_id, u.started_at
                    );
                }
                UnitStatus::InProgress => {
                    return Err(TransitionError::Busy {
                        unit: unit_id,
                        started: u
                            .started_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "unknown".to_string()),
                    }
                    .into());
                }
                UnitStatus::Completed => {
                    return Err(TransitionError::Illegal {
                        unit: unit_id,
                        from: u.status,
                        to: UnitStatus::InProgress,
                    }
                    .into());
                }
            }
        }
        let mut unit = existing.unwrap_or_else(|| IngestionUnit::pending(unit_id, now));
        let patch = UnitPatch {
            started_at: Some(now),
            clear_outcome: true,
            ..UnitPatch::status(UnitStatus::InProgress).with_counters(UnitCounters::default())
        };
        patch.apply(&mut unit, now);
        upsert_unit(&tx, &unit)?;
        tx.commit().context("commit unit start")?;
        self.active.insert(unit_id);
        info!("Unit {} started", unit_id);
        Ok(unit)
    }

    fn finish(&mut self, unit_id: UnitId, patch: UnitPatch) -> Result<IngestionUnit> {
        let now = Utc::now();
        let to = patch.status.unwrap_or(UnitStatus::Failed);
        let tx = self.conn.transaction().context("begin transaction")?;
        let mut unit = match load_unit(&tx, unit_id)? {
            Some(u) if u.status == UnitStatus::InProgress => u,
            Some(u) => {
                return Err(TransitionError::Illegal {
                    unit: unit_id,
                    from: u.status,
                    to,
                }
                .into());
            }
            None => {
                return Err(TransitionError::Illegal {
                    unit: unit_id,
                    from: UnitStatus::Pending,
                    to,
                }
                .into());
            }
        };
        patch.apply(&mut unit, now);
        upsert_unit(&tx, &unit)?;
        tx.commit().context("commit unit finish")?;
        self.active.remove(&unit_id);
        Ok(unit)
    }

    pub fn mark_completed(
        &mut self,
        unit_id: UnitId,
        counters: UnitCounters,
    ) -> Result<IngestionUnit> {
        let patch = UnitPatch {
            completed_at: Some(Utc::now()),
            ..UnitPatch::status(UnitStatus::Completed).with_counters(counters)
        };
        let unit = self.finish(unit_id, patch)?;
        info!("Unit {} completed", unit_id);
        Ok(unit)
    }

    /// Counters are merged only if given; a unit that failed during discovery has none.
    pub fn mark_failed(
        &mut self,
        unit_id: UnitId,
        message: &str,
        counters: Option<UnitCounters>,
    ) -> Result<IngestionUnit> {
        let mut patch = UnitPatch {
            error_message: Some(message.to_string()),
            ..UnitPatch::status(UnitStatus::Failed)
        };
        if let Some(c) = counters {
            patch = patch.with_counters(c);
        }
        let unit = self.finish(unit_id, patch)?;
        warn!("Unit {} failed: {}", unit_id, message);
        Ok(unit)
    }

    /// Mark every unit this process still has `in_progress` as failed. Returns how many.
    pub fn fail_active(&mut self, reason: &str) -> usize {
        let mut failed = 0;
        for unit_id in self.active_units() {
            match self.mark_failed(unit_id, reason, None) {
                Ok(_) => failed += 1,
                Err(e) => warn!("Could not mark unit {} failed: {:#}", unit_id, e),
            }
        }
        failed
    }

    /// Delete progress rows so the units are picked up as new. Returns rows removed.
    pub fn reset(&mut self, unit_ids: &[UnitId]) -> Result<usize> {
        let tx = self.conn.transaction().context("begin transaction")?;
        let mut removed = 0;
        for &id in unit_ids {
            if delete_unit(&tx, id)? {
                removed += 1;
            } else {
                debug!("Unit {} had no progress row", id);
            }
            self.active.remove(&id);
        }
        tx.commit().context("commit reset")?;
        Ok(removed)
    }
}
