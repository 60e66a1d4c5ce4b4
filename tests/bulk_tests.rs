mod common;

use common::*;
use edgarsync::bulk::{BulkConfig, BulkOrchestrator, ThrottleVerdict, assess_throttling};
use edgarsync::engine::{Fetcher, Store, StopSignal};
use edgarsync::pipeline::PipelineConfig;
use edgarsync::utils::config::{BulkConsts, PipelineConsts};
use edgarsync::{FilingDescriptor, Opts, PipelineError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn config() -> BulkConfig {
    BulkConfig {
        fetch_workers: 3,
        chunk_size: 4,
        cooldown: Duration::from_millis(20),
        ..BulkConfig::default()
    }
}

fn orchestrator(
    t: &Arc<ScriptedTransport>,
    db: &Path,
    config: BulkConfig,
    cancel: StopSignal,
) -> BulkOrchestrator {
    let fetcher = Arc::new(Fetcher::new(t.clone(), open_limiter(), fast_policy()));
    BulkOrchestrator::new(fetcher, db, config, cancel).unwrap()
}

fn scripted(t: &ScriptedTransport, keys: &[String]) -> Vec<FilingDescriptor> {
    keys.iter()
        .map(|k| {
            let d = descriptor(k);
            t.ok(&d.url, &filing_text(k));
            d
        })
        .collect()
}

// --- pre-filter ---

#[test]
fn stored_keys_are_not_fetched() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let keys = vec![
        "A-23-000001".to_string(),
        "B-23-000001".to_string(),
        "C-23-000001".to_string(),
    ];
    let descriptors = scripted(&t, &keys);
    {
        let mut store = Store::open(&db).unwrap();
        store.store_batch(
            &[
                store_item(&keys[0], &filing_text(&keys[0])),
                store_item(&keys[1], &filing_text(&keys[1])),
            ],
            false,
        );
    }

    let stats = orchestrator(&t, &db, config(), StopSignal::new())
        .run(descriptors.clone())
        .unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.downloaded, 1);
    assert_eq!(stats.stored, 1);
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.errors, 0);
    assert_eq!(t.calls_to(&descriptors[0].url), 0);
    assert_eq!(t.calls_to(&descriptors[1].url), 0);
    assert_eq!(t.calls_to(&descriptors[2].url), 1);
}

#[test]
fn force_fetches_and_overwrites_everything() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let keys = accessions("0001", 5);
    let descriptors = scripted(&t, &keys);
    orchestrator(&t, &db, config(), StopSignal::new())
        .run(descriptors.clone())
        .unwrap();

    let forced = BulkConfig {
        force: true,
        ..config()
    };
    let stats = orchestrator(&t, &db, forced, StopSignal::new())
        .run(descriptors)
        .unwrap();
    assert_eq!((stats.downloaded, stats.stored, stats.skipped), (5, 5, 0));
    assert_eq!(Store::open(&db).unwrap().counts().unwrap().filings, 5);
}

// --- content ---

#[test]
fn bulk_stores_raw_unparsed_content() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let keys = accessions("0002", 9);
    let descriptors = scripted(&t, &keys);

    let stats = orchestrator(&t, &db, config(), StopSignal::new())
        .run(descriptors)
        .unwrap();
    assert_eq!(stats.stored, 9);
    let store = Store::open(&db).unwrap();
    let row = store.lookup(&keys[4]).unwrap().unwrap();
    assert!(!row.processed);
    assert!(row.content.starts_with("<ownershipDocument>"));
    assert_eq!(store.counts().unwrap().processed, 0);
}

#[test]
fn fetch_failures_are_counted() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let keys = accessions("0003", 6);
    let mut descriptors = scripted(&t, &keys[..4]);
    // Unscripted URLs answer 404.
    descriptors.push(descriptor(&keys[4]));
    descriptors.push(descriptor(&keys[5]));

    let stats = orchestrator(&t, &db, config(), StopSignal::new())
        .run(descriptors)
        .unwrap();
    assert_eq!((stats.downloaded, stats.stored, stats.errors), (4, 4, 2));
}

// --- throttling ---

#[test]
fn throttle_verdict_thresholds() {
    assert_eq!(assess_throttling(0, 0), ThrottleVerdict::Healthy);
    assert_eq!(assess_throttling(0, 50), ThrottleVerdict::Healthy);
    assert_eq!(assess_throttling(25, 50), ThrottleVerdict::Healthy);
    assert_eq!(assess_throttling(26, 50), ThrottleVerdict::Warn);
    assert_eq!(assess_throttling(40, 50), ThrottleVerdict::Warn);
    assert_eq!(assess_throttling(41, 50), ThrottleVerdict::Cooldown);
    assert_eq!(assess_throttling(50, 50), ThrottleVerdict::Cooldown);
}

#[test]
fn throttled_chunks_count_errors_and_continue() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let keys = accessions("0004", 8);
    let descriptors: Vec<_> = keys.iter().map(|k| descriptor(k)).collect();
    for d in &descriptors {
        t.route(&d.url, vec![reply_status(429)]);
    }

    let stats = orchestrator(&t, &db, config(), StopSignal::new())
        .run(descriptors)
        .unwrap();
    assert_eq!(stats.throttled, 8);
    assert_eq!(stats.errors, 8);
    assert_eq!(stats.stored, 0);
    // Both chunks ran despite the cooldown between them.
    assert_eq!(t.total_calls(), 8 * 3);
}

// --- lifecycle ---

#[test]
fn worker_count_is_capped() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let wide = BulkConfig {
        fetch_workers: 20,
        ..config()
    };
    assert_eq!(orchestrator(&t, &db, wide, StopSignal::new()).workers(), 8);
    assert_eq!(orchestrator(&t, &db, config(), StopSignal::new()).workers(), 3);
}

#[test]
fn each_mode_has_its_own_worker_default() {
    let opts = Opts::default();
    assert_eq!(
        BulkConfig::from(&opts).fetch_workers,
        BulkConsts::FETCH_WORKERS
    );
    assert_eq!(
        PipelineConfig::from(&opts).download_workers,
        PipelineConsts::DOWNLOAD_WORKERS
    );

    let chosen = Opts {
        fetch_workers: Some(3),
        ..Opts::default()
    };
    assert_eq!(BulkConfig::from(&chosen).fetch_workers, 3);
    assert_eq!(PipelineConfig::from(&chosen).download_workers, 3);
}

#[test]
fn cancelled_run_fetches_nothing() {
    let (_dir, db) = temp_db();
    let t = Arc::new(ScriptedTransport::new());
    let descriptors = scripted(&t, &accessions("0005", 6));
    let cancel = StopSignal::new();
    cancel.raise();

    let result = orchestrator(&t, &db, config(), cancel).run(descriptors);
    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert_eq!(t.total_calls(), 0);
}
