mod common;

use chrono::{Duration, Utc};
use common::temp_db;
use edgarsync::engine::{ProgressTracker, UnitPatch};
use edgarsync::{TransitionError, UnitCounters, UnitStatus, WorkPolicy};

const STALE_HOURS: i64 = 24;

fn counters(stored: u64) -> UnitCounters {
    UnitCounters {
        discovered: stored + 2,
        downloaded: stored + 1,
        stored,
        errors: 1,
        skipped: 1,
    }
}

fn transition_err(err: anyhow::Error) -> TransitionError {
    err.downcast::<TransitionError>().unwrap()
}

// --- selection ---

#[test]
fn fresh_database_needs_whole_range() {
    let (_dir, path) = temp_db();
    let tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    let ids = tracker
        .units_needing_work(2020..=2023, WorkPolicy::Incremental)
        .unwrap();
    assert_eq!(ids, vec![2020, 2021, 2022, 2023]);
}

#[test]
fn incremental_selection_by_status() {
    let (_dir, path) = temp_db();
    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    let now = Utc::now();

    // 2020 completed, 2021 failed, 2022 pending, 2023 stale, 2024 fresh in-progress, 2025 never seen.
    tracker.mark_started(2020, WorkPolicy::Incremental).unwrap();
    tracker.mark_completed(2020, counters(5)).unwrap();
    tracker.mark_started(2021, WorkPolicy::Incremental).unwrap();
    tracker.mark_failed(2021, "boom", None).unwrap();
    tracker
        .update(2022, &UnitPatch::status(UnitStatus::Pending))
        .unwrap();
    tracker
        .update(
            2023,
            &UnitPatch {
                started_at: Some(now - Duration::hours(30)),
                ..UnitPatch::status(UnitStatus::InProgress)
            },
        )
        .unwrap();
    tracker
        .update(
            2024,
            &UnitPatch {
                started_at: Some(now - Duration::hours(10)),
                ..UnitPatch::status(UnitStatus::InProgress)
            },
        )
        .unwrap();

    let ids = tracker
        .units_needing_work_at(2020..=2025, WorkPolicy::Incremental, now)
        .unwrap();
    assert_eq!(ids, vec![2021, 2022, 2023, 2025]);
}

#[test]
fn force_selects_whole_range() {
    let (_dir, path) = temp_db();
    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    tracker.mark_started(2020, WorkPolicy::Incremental).unwrap();
    tracker.mark_completed(2020, counters(1)).unwrap();

    let ids = tracker
        .units_needing_work(2019..=2021, WorkPolicy::Force)
        .unwrap();
    assert_eq!(ids, vec![2019, 2020, 2021]);
}

// --- transitions ---

#[test]
fn start_then_complete_records_counters() {
    let (_dir, path) = temp_db();
    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();

    let started = tracker.mark_started(2022, WorkPolicy::Incremental).unwrap();
    assert_eq!(started.status, UnitStatus::InProgress);
    assert!(started.started_at.is_some());
    assert_eq!(tracker.active_units(), vec![2022]);

    let done = tracker.mark_completed(2022, counters(7)).unwrap();
    assert_eq!(done.status, UnitStatus::Completed);
    assert_eq!(done.counters, counters(7));
    assert!(done.completed_at.is_some());
    assert!(tracker.active_units().is_empty());

    let reloaded = tracker.unit(2022).unwrap().unwrap();
    assert_eq!(reloaded.status, UnitStatus::Completed);
    assert_eq!(reloaded.counters.stored, 7);
}

#[test]
fn completed_unit_cannot_restart_incrementally() {
    let (_dir, path) = temp_db();
    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    tracker.mark_started(2022, WorkPolicy::Incremental).unwrap();
    tracker.mark_completed(2022, counters(1)).unwrap();

    let err = tracker
        .mark_started(2022, WorkPolicy::Incremental)
        .unwrap_err();
    assert!(matches!(
        transition_err(err),
        TransitionError::Illegal {
            unit: 2022,
            from: UnitStatus::Completed,
            to: UnitStatus::InProgress
        }
    ));
}

#[test]
fn force_restarts_completed_unit_from_scratch() {
    let (_dir, path) = temp_db();
    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    tracker.mark_started(2022, WorkPolicy::Incremental).unwrap();
    tracker.mark_completed(2022, counters(9)).unwrap();

    let restarted = tracker.mark_started(2022, WorkPolicy::Force).unwrap();
    assert_eq!(restarted.status, UnitStatus::InProgress);
    assert_eq!(restarted.counters, UnitCounters::default());
    assert!(restarted.completed_at.is_none());
}

#[test]
fn fresh_in_progress_unit_is_busy() {
    let (_dir, path) = temp_db();
    let mut other = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    other.mark_started(2022, WorkPolicy::Incremental).unwrap();

    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    let err = tracker
        .mark_started(2022, WorkPolicy::Incremental)
        .unwrap_err();
    assert!(matches!(
        transition_err(err),
        TransitionError::Busy { unit: 2022, .. }
    ));
}

#[test]
fn stale_in_progress_unit_restarts() {
    let (_dir, path) = temp_db();
    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    tracker
        .update(
            2022,
            &UnitPatch {
                started_at: Some(Utc::now() - Duration::hours(30)),
                ..UnitPatch::status(UnitStatus::InProgress)
            },
        )
        .unwrap();

    let unit = tracker.mark_started(2022, WorkPolicy::Incremental).unwrap();
    assert!(unit.started_at.unwrap() > Utc::now() - Duration::minutes(1));
}

#[test]
fn failed_unit_restarts_and_clears_error() {
    let (_dir, path) = temp_db();
    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    tracker.mark_started(2022, WorkPolicy::Incremental).unwrap();
    tracker
        .mark_failed(2022, "network down", Some(counters(3)))
        .unwrap();
    let failed = tracker.unit(2022).unwrap().unwrap();
    assert_eq!(failed.error_message.as_deref(), Some("network down"));
    assert_eq!(failed.counters.stored, 3);

    let restarted = tracker.mark_started(2022, WorkPolicy::Incremental).unwrap();
    assert_eq!(restarted.error_message, None);
    assert_eq!(restarted.counters, UnitCounters::default());
}

#[test]
fn finishing_requires_in_progress() {
    let (_dir, path) = temp_db();
    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    assert!(tracker.mark_completed(2022, counters(1)).is_err());
    assert!(tracker.mark_failed(2022, "x", None).is_err());

    tracker.mark_started(2022, WorkPolicy::Incremental).unwrap();
    tracker.mark_completed(2022, counters(1)).unwrap();
    let err = tracker.mark_failed(2022, "late", None).unwrap_err();
    assert!(matches!(
        transition_err(err),
        TransitionError::Illegal {
            from: UnitStatus::Completed,
            ..
        }
    ));
}

// --- partial updates ---

#[test]
fn update_merges_only_given_fields() {
    let (_dir, path) = temp_db();
    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    tracker.mark_started(2022, WorkPolicy::Incremental).unwrap();
    tracker
        .update(
            2022,
            &UnitPatch::status(UnitStatus::InProgress).with_counters(counters(4)),
        )
        .unwrap();

    let unit = tracker
        .update(
            2022,
            &UnitPatch {
                discovered: Some(100),
                ..UnitPatch::default()
            },
        )
        .unwrap();
    assert_eq!(unit.status, UnitStatus::InProgress);
    assert_eq!(unit.counters.discovered, 100);
    assert_eq!(unit.counters.stored, 4);
    assert_eq!(unit.counters.errors, 1);
}

// --- interrupt handling ---

#[test]
fn fail_active_marks_only_units_started_here() {
    let (_dir, path) = temp_db();
    let mut other = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    other.mark_started(2019, WorkPolicy::Incremental).unwrap();

    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    tracker.mark_started(2020, WorkPolicy::Incremental).unwrap();
    tracker.mark_completed(2020, counters(1)).unwrap();
    tracker.mark_started(2021, WorkPolicy::Incremental).unwrap();

    assert_eq!(tracker.fail_active("cancelled by user"), 1);
    let u = tracker.unit(2021).unwrap().unwrap();
    assert_eq!(u.status, UnitStatus::Failed);
    assert_eq!(u.error_message.as_deref(), Some("cancelled by user"));
    assert_eq!(tracker.unit(2020).unwrap().unwrap().status, UnitStatus::Completed);
    assert_eq!(tracker.unit(2019).unwrap().unwrap().status, UnitStatus::InProgress);
    assert_eq!(tracker.fail_active("again"), 0);
}

#[test]
fn reset_forgets_progress() {
    let (_dir, path) = temp_db();
    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    tracker.mark_started(2021, WorkPolicy::Incremental).unwrap();
    tracker.mark_completed(2021, counters(1)).unwrap();

    assert_eq!(tracker.reset(&[2021, 2022]).unwrap(), 1);
    assert!(tracker.unit(2021).unwrap().is_none());
    let ids = tracker
        .units_needing_work(2021..=2021, WorkPolicy::Incremental)
        .unwrap();
    assert_eq!(ids, vec![2021]);
}

#[test]
fn units_listing_respects_range() {
    let (_dir, path) = temp_db();
    let mut tracker = ProgressTracker::open(&path, STALE_HOURS).unwrap();
    for y in 2018..=2022 {
        tracker.update(y, &UnitPatch::status(UnitStatus::Pending)).unwrap();
    }
    assert_eq!(tracker.units(None).unwrap().len(), 5);
    let ids: Vec<_> = tracker
        .units(Some(2019..=2020))
        .unwrap()
        .iter()
        .map(|u| u.unit_id)
        .collect();
    assert_eq!(ids, vec![2019, 2020]);
}
