//! End-to-end harvest: list, fetch, normalize, store

use anyhow::{Context, Result};
use log::info;
use std::time::{Duration, Instant};

use super::cancel::CancelToken;
use super::fetch::{BatchSource, FetchEngine, FetchOptions, StopReason};
use crate::gmail::{ListPages, list_all_ids, normalize_metadata};
use crate::models::{EmailRecord, MessageId};
use crate::storage::RecordStore;

/// What to harvest and how
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    /// Gmail search query; empty for the whole mailbox
    pub query: String,
    /// Leave out IDs that are already stored
    pub skip_existing: bool,
    pub fetch: FetchOptions,
}

/// Statistics from a harvest run
#[derive(Debug, Default, Clone)]
pub struct HarvestStats {
    /// IDs returned by the listing
    pub listed: usize,
    /// IDs not fetched because they were already stored
    pub skipped_existing: usize,
    pub fetched: usize,
    pub stored: usize,
    /// IDs that failed permanently, with their reasons
    pub failures: Vec<(MessageId, String)>,
    /// IDs left unresolved by cancellation
    pub pending: Vec<MessageId>,
    pub rounds: usize,
    pub stop: StopReason,
    pub duration: Duration,
}

/// Harvest metadata for every message matching the query into `store`
///
/// A listing failure aborts the run before anything is fetched. Fetch
/// failures do not: they are reported in the returned stats. Running it
/// again is safe; records are upserted by ID.
pub fn harvest<C>(
    client: &C,
    store: &dyn RecordStore,
    options: &HarvestOptions,
    cancel: &CancelToken,
) -> Result<HarvestStats>
where
    C: ListPages + BatchSource + ?Sized,
{
    let start = Instant::now();
    let mut stats = HarvestStats::default();

    // 1. List every matching ID
    let ids = list_all_ids(client, &options.query).context("Failed to list messages")?;
    stats.listed = ids.len();
    info!("[HARVEST] Listed {} messages", ids.len());

    // 2. Filter out already-stored messages
    let to_fetch = if options.skip_existing {
        let mut to_fetch = Vec::with_capacity(ids.len());
        for id in ids {
            if store.has_record(&id)? {
                stats.skipped_existing += 1;
            } else {
                to_fetch.push(id);
            }
        }
        if stats.skipped_existing > 0 {
            info!("[HARVEST] Skipping {} already stored messages", stats.skipped_existing);
        }
        to_fetch
    } else {
        ids
    };

    // 3. Fetch until every ID is resolved
    let engine = FetchEngine::new(client, options.fetch.clone());
    let report = engine.fetch_all(to_fetch, cancel);
    stats.fetched = report.records.len();
    stats.rounds = report.rounds.len();
    stats.stop = report.stop;
    stats.pending = report.pending;
    stats.failures = report
        .permanent_failures
        .into_iter()
        .map(|(id, e)| (id, e.to_string()))
        .collect();

    // 4. Normalize and store
    let records: Vec<EmailRecord> = report.records.iter().map(normalize_metadata).collect();
    if !records.is_empty() {
        stats.stored = store
            .upsert_records(&records)
            .context("Failed to store fetched records")?;
    }

    stats.duration = start.elapsed();
    info!(
        "[HARVEST] Stored {} of {} listed messages in {:.1}s ({} failed, {} pending, {:?})",
        stats.stored,
        stats.listed,
        stats.duration.as_secs_f64(),
        stats.failures.len(),
        stats.pending.len(),
        stats.stop
    );
    Ok(stats)
}
