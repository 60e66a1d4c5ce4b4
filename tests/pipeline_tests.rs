mod common;

use common::*;
use edgarsync::engine::{Fetcher, OwnershipParser, Store, StopSignal};
use edgarsync::pipeline::{CoordinatorState, PipelineConfig, PipelineCoordinator};
use edgarsync::{FilingDescriptor, PipelineError};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config() -> PipelineConfig {
    PipelineConfig {
        download_workers: 3,
        parse_workers: 2,
        batch_size: 4,
        idle_flush: Duration::from_millis(100),
        drain_timeout: Duration::from_secs(5),
        join_timeout: Duration::from_secs(5),
        ..PipelineConfig::default()
    }
}

fn coordinator(
    t: &Arc<ScriptedTransport>,
    db: &Path,
    config: PipelineConfig,
    cancel: StopSignal,
) -> PipelineCoordinator {
    let fetcher = Arc::new(Fetcher::new(t.clone(), open_limiter(), fast_policy()));
    let parser = Arc::new(OwnershipParser::new().unwrap());
    PipelineCoordinator::new(fetcher, parser, db, config, cancel)
}

/// Script `n` good filings; returns their descriptors.
fn good_filings(t: &ScriptedTransport, prefix: &str, n: usize) -> Vec<FilingDescriptor> {
    accessions(prefix, n)
        .iter()
        .map(|acc| {
            let d = descriptor(acc);
            t.ok(&d.url, &filing_text(acc));
            d
        })
        .collect()
}

// --- drain ---

#[test]
fn every_item_is_accounted_for() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let mut descriptors = good_filings(&t, "0001", 15);

    // Two missing documents, one short payload, two unparseable ones.
    for acc in accessions("0002", 2) {
        descriptors.push(descriptor(&acc));
    }
    let short = descriptor("0003-23-000000");
    t.ok(&short.url, "tiny");
    descriptors.push(short);
    for acc in accessions("0004", 2) {
        let d = descriptor(&acc);
        t.ok(&d.url, &unparseable_text(&acc));
        descriptors.push(d);
    }

    let c = coordinator(&t, &db, config(), StopSignal::new());
    assert_eq!(c.state(), CoordinatorState::Idle);
    let stats = c.run(descriptors).unwrap();
    assert_eq!(c.state(), CoordinatorState::Stopped);

    assert_eq!(stats.total, 20);
    assert_eq!(stats.downloaded, 17);
    assert_eq!(stats.parsed, 15);
    assert_eq!(stats.stored, 15);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.errors, 5);
    assert!(stats.start_time.is_some() && stats.end_time.is_some());

    let store = Store::open(&db).unwrap();
    let counts = store.counts().unwrap();
    assert_eq!(counts.filings, 15);
    assert_eq!(counts.processed, 15);
}

#[test]
fn partial_batch_flushes_before_run_returns() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let descriptors = good_filings(&t, "0005", 3);
    let cfg = PipelineConfig {
        batch_size: 100,
        ..config()
    };

    let stats = coordinator(&t, &db, cfg, StopSignal::new())
        .run(descriptors)
        .unwrap();
    assert_eq!(stats.stored, 3);
    assert_eq!(Store::open(&db).unwrap().counts().unwrap().filings, 3);
}

#[test]
fn empty_input_finishes() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let stats = coordinator(&t, &db, config(), StopSignal::new())
        .run(Vec::new())
        .unwrap();
    assert_eq!((stats.total, stats.stored, stats.errors), (0, 0, 0));
    assert_eq!(t.total_calls(), 0);
}

// --- dedup through the pipeline ---

#[test]
fn rerun_skips_stored_filings() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let descriptors = good_filings(&t, "0006", 6);

    coordinator(&t, &db, config(), StopSignal::new())
        .run(descriptors.clone())
        .unwrap();
    let again = coordinator(&t, &db, config(), StopSignal::new())
        .run(descriptors)
        .unwrap();
    assert_eq!((again.stored, again.skipped, again.errors), (0, 6, 0));
    assert_eq!(Store::open(&db).unwrap().counts().unwrap().filings, 6);
}

#[test]
fn forced_rerun_overwrites() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let descriptors = good_filings(&t, "0007", 4);

    coordinator(&t, &db, config(), StopSignal::new())
        .run(descriptors.clone())
        .unwrap();
    let forced = PipelineConfig {
        force: true,
        ..config()
    };
    let again = coordinator(&t, &db, forced, StopSignal::new())
        .run(descriptors)
        .unwrap();
    assert_eq!((again.stored, again.skipped), (4, 0));
    assert_eq!(Store::open(&db).unwrap().counts().unwrap().filings, 4);
}

// --- lifecycle ---

#[test]
fn coordinator_runs_once() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let c = coordinator(&t, &db, config(), StopSignal::new());
    c.run(Vec::new()).unwrap();
    assert!(matches!(c.run(Vec::new()), Err(PipelineError::AlreadyRan)));
}

#[test]
fn cancelled_before_start_returns_cancelled() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let descriptors = good_filings(&t, "0008", 5);
    let cancel = StopSignal::new();
    cancel.raise();

    let c = coordinator(&t, &db, config(), cancel);
    let start = Instant::now();
    assert!(matches!(c.run(descriptors), Err(PipelineError::Cancelled)));
    assert_eq!(c.state(), CoordinatorState::Stopped);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(t.total_calls(), 0);
}

#[test]
fn cancel_mid_run_stops_and_keeps_stored_rows() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let descriptors = good_filings(&t, "0009", 40);
    let cancel = StopSignal::new();
    t.stop_on(&descriptors[10].url, cancel.clone());
    let cfg = PipelineConfig {
        download_workers: 1,
        batch_size: 1,
        ..config()
    };

    let c = coordinator(&t, &db, cfg, cancel);
    let start = Instant::now();
    assert!(matches!(c.run(descriptors), Err(PipelineError::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(15));
    assert_eq!(c.state(), CoordinatorState::Stopped);
    // Work stopped early; whatever was stored is committed and readable.
    assert!(t.total_calls() < 40);
    let filings = Store::open(&db).unwrap().counts().unwrap().filings;
    assert!(filings <= 11);
}
