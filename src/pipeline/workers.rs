//! Stage loops. Each acknowledges an item only after handing it downstream (or dropping it).

use log::{debug, error, warn};
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::engine::db_ops::Store;
use crate::engine::progress::update_progress_bar;
use crate::error::FetchError;
use crate::types::StoreItem;
use crate::utils::config::PipelineConsts;

use super::context::{PipelineContext, PipelineStats};

fn download_worker_loop(ctx: PipelineContext) {
    while !ctx.cancel.is_raised() && !ctx.halt.is_raised() {
        let Some(descriptor) = ctx.download_q.get(PipelineConsts::POLL_INTERVAL) else {
            continue;
        };
        match ctx.fetcher.fetch(&descriptor, &ctx.cancel) {
            Ok(content) => {
                PipelineStats::bump(&ctx.stats.downloaded);
                if ctx.parse_q.put((descriptor, content), &ctx.halt).is_err() {
                    debug!("Parse queue closed; dropping downloaded item");
                }
            }
            Err(e) => {
                if e.kind().is_counted() {
                    PipelineStats::bump(&ctx.stats.download_errors);
                }
                if matches!(e, FetchError::Throttled { .. }) {
                    PipelineStats::bump(&ctx.stats.throttled);
                }
                debug!("Dropped {}: {}", descriptor.accession_number, e);
            }
        }
        ctx.download_q.task_done();
    }
}

/// Parse workers keep draining under cancellation; only `halt` ends them.
fn parse_worker_loop(ctx: PipelineContext) {
    loop {
        let Some((descriptor, content)) = ctx.parse_q.get(PipelineConsts::POLL_INTERVAL) else {
            if ctx.halt.is_raised() {
                break;
            }
            continue;
        };
        match ctx.parser.parse(&descriptor, &content) {
            Ok(record) => {
                PipelineStats::bump(&ctx.stats.parsed);
                let item = StoreItem {
                    descriptor,
                    content,
                    record: Some(record),
                };
                if ctx.store_q.put(item, &ctx.halt).is_err() {
                    debug!("Store queue closed; dropping parsed item");
                }
            }
            Err(e) => {
                if e.kind().is_counted() {
                    PipelineStats::bump(&ctx.stats.parse_errors);
                }
                warn!("Parse failed for {}: {}", descriptor.accession_number, e);
            }
        }
        ctx.parse_q.task_done();
    }
}

fn flush(ctx: &PipelineContext, store: &mut Store, batch: &mut Vec<StoreItem>) {
    if batch.is_empty() {
        return;
    }
    let result = store.store_batch(batch, ctx.config.force);
    ctx.stats
        .stored
        .fetch_add(result.stored, Ordering::Relaxed);
    ctx.stats
        .skipped
        .fetch_add(result.skipped, Ordering::Relaxed);
    ctx.stats
        .store_errors
        .fetch_add(result.errors, Ordering::Relaxed);
    if let Some(ref bar) = ctx.bar {
        update_progress_bar(bar, batch.len());
    }
    ctx.store_q.task_done_n(batch.len());
    batch.clear();
}

/// Single writer: flush on batch-full, or once the oldest pending item has waited `idle_flush`.
fn store_worker_loop(ctx: PipelineContext, mut store: Store) {
    let batch_size = ctx.config.batch_size.max(1);
    let mut batch: Vec<StoreItem> = Vec::with_capacity(batch_size);
    let mut pending_since: Option<Instant> = None;
    let poll = PipelineConsts::POLL_INTERVAL.min(ctx.config.idle_flush);

    loop {
        match ctx.store_q.get(poll) {
            Some(item) => {
                batch.push(item);
                pending_since.get_or_insert_with(Instant::now);
                if batch.len() >= batch_size {
                    flush(&ctx, &mut store, &mut batch);
                    pending_since = None;
                }
            }
            None => {
                if ctx.halt.is_raised() {
                    flush(&ctx, &mut store, &mut batch);
                    break;
                }
            }
        }
        if pending_since.is_some_and(|t| t.elapsed() >= ctx.config.idle_flush) {
            flush(&ctx, &mut store, &mut batch);
            pending_since = None;
        }
    }
    if let Err(e) = store.checkpoint() {
        error!("WAL checkpoint after pipeline run failed: {:#}", e);
    }
}

fn spawn_named<F>(name: String, f: F) -> Option<(String, JoinHandle<()>)>
where
    F: FnOnce() + Send + 'static,
{
    match thread::Builder::new().name(name.clone()).spawn(f) {
        Ok(h) => Some((name, h)),
        Err(e) => {
            error!("Failed to spawn {}: {}", name, e);
            None
        }
    }
}

pub fn spawn_download_workers(ctx: &PipelineContext, n: usize) -> Vec<(String, JoinHandle<()>)> {
    (0..n)
        .filter_map(|i| {
            let ctx = ctx.clone();
            spawn_named(format!("download-{i}"), move || download_worker_loop(ctx))
        })
        .collect()
}

pub fn spawn_parse_workers(ctx: &PipelineContext, n: usize) -> Vec<(String, JoinHandle<()>)> {
    (0..n)
        .filter_map(|i| {
            let ctx = ctx.clone();
            spawn_named(format!("parse-{i}"), move || parse_worker_loop(ctx))
        })
        .collect()
}

pub fn spawn_store_worker(ctx: &PipelineContext, store: Store) -> Option<(String, JoinHandle<()>)> {
    let ctx = ctx.clone();
    spawn_named("store".to_string(), move || store_worker_loop(ctx, store))
}
