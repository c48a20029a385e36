//! Batched fetch with retry-until-convergence
//!
//! The engine takes a set of message IDs and keeps fetching in rounds until
//! every ID is either fetched or has failed permanently:
//!
//! 1. The pending IDs are cut into contiguous batches.
//! 2. Each batch is one network round-trip. A throttled batch is retried in
//!    place with exponential backoff; any other batch failure sends all of its
//!    members to the next round.
//! 3. Inside a successful batch, throttled members go to the next round and
//!    other failures are final.
//!
//! Rounds are barriers: no batch of round N+1 starts before every batch of
//! round N has finished.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::backoff::Backoff;
use super::cancel::CancelToken;
use super::pacing::{Pacer, Sleeper, ThreadSleeper};
use crate::gmail::api::GmailMessage;
use crate::models::{ItemError, ItemOutcome, MessageId};

/// A whole batch request failed
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The service throttled the request; retry the same batch after a delay
    #[error("Batch request was rate limited")]
    RateLimited {
        /// Server-suggested wait, if it sent one
        retry_after: Option<Duration>,
    },
    /// Anything else (network, 5xx, unparseable response)
    #[error("Batch request failed: {0}")]
    Transport(#[source] anyhow::Error),
}

/// Backend able to fetch many messages in one round-trip
pub trait BatchSource: Send + Sync {
    /// Fetch every ID in `ids`, reporting one outcome per member.
    ///
    /// Members missing from the returned list are treated as not fetched.
    fn get_batch(&self, ids: &[MessageId]) -> Result<Vec<(MessageId, ItemOutcome)>, BatchError>;
}

/// Tuning for [`FetchEngine`]
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Maximum members per batch request
    pub batch_size: usize,
    /// Submissions per batch while it keeps being throttled
    pub max_attempts_per_batch: u32,
    /// First backoff delay; doubled on every further throttled attempt
    pub backoff_base: Duration,
    /// Upper bound of the random jitter added to each backoff delay
    pub jitter_max: Duration,
    /// Pause between batches, whatever their outcome
    pub pacing: Duration,
    /// Batches submitted in parallel within a round
    pub concurrency: usize,
    /// Give up after this many rounds (unbounded when `None`)
    pub max_rounds: Option<usize>,
    /// Give up once this much time has passed (unbounded when `None`)
    pub max_duration: Option<Duration>,
    /// Seed for the jitter generator; random when `None`
    pub seed: Option<u64>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_attempts_per_batch: 5,
            backoff_base: Duration::from_secs(1),
            jitter_max: Duration::from_secs(1),
            pacing: Duration::from_millis(300),
            concurrency: 1,
            max_rounds: None,
            max_duration: None,
            seed: None,
        }
    }
}

/// Why [`FetchEngine::fetch_all`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    /// Every ID was fetched or failed permanently
    #[default]
    Completed,
    /// The cancel token fired; unfinished IDs are in `pending`
    Cancelled,
    /// `max_rounds` was reached; leftovers became permanent failures
    RoundLimit,
    /// `max_duration` elapsed; leftovers became permanent failures
    DeadlineExceeded,
}

/// Counters for one round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundStats {
    /// 1-based round number
    pub round: usize,
    /// IDs pending when the round started
    pub pending: usize,
    pub batches: usize,
    pub succeeded: usize,
    /// IDs carried into the next round
    pub retried: usize,
    /// IDs that failed permanently in this round
    pub failed: usize,
    /// IDs never submitted because of cancellation or the deadline
    pub skipped: usize,
    /// Throttled batch submissions
    pub throttled_attempts: usize,
}

/// Everything a fetch run produced
#[derive(Debug, Default)]
pub struct FetchReport {
    pub records: Vec<GmailMessage>,
    pub permanent_failures: BTreeMap<MessageId, ItemError>,
    /// Not yet resolved; only non-empty after cancellation
    pub pending: Vec<MessageId>,
    pub rounds: Vec<RoundStats>,
    pub stop: StopReason,
}

impl FetchReport {
    /// Number of distinct IDs accounted for
    pub fn accounted(&self) -> usize {
        self.records.len() + self.permanent_failures.len() + self.pending.len()
    }
}

/// Contiguous batches of at most `batch_size` IDs, in input order
pub fn plan_batches(ids: &[MessageId], batch_size: usize) -> std::slice::Chunks<'_, MessageId> {
    ids.chunks(batch_size.max(1))
}

/// Outcome of one batch within a round
#[derive(Default)]
struct BatchResult {
    fetched: Vec<GmailMessage>,
    retry: Vec<MessageId>,
    failed: Vec<(MessageId, ItemError)>,
    skipped: Vec<MessageId>,
    throttled_attempts: usize,
}

/// When a round's batches must stop being submitted
#[derive(Clone, Copy)]
struct Limits<'c> {
    cancel: &'c CancelToken,
    deadline: Option<Instant>,
}

impl Limits<'_> {
    fn past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Runs fetch rounds against a [`BatchSource`]
pub struct FetchEngine<'a, S: BatchSource + ?Sized> {
    source: &'a S,
    options: FetchOptions,
    backoff: Backoff,
    pacer: Pacer,
    sleeper: Arc<dyn Sleeper>,
    pool: Option<rayon::ThreadPool>,
}

impl<'a, S: BatchSource + ?Sized> FetchEngine<'a, S> {
    pub fn new(source: &'a S, options: FetchOptions) -> Self {
        let backoff = Backoff::new(options.backoff_base, options.jitter_max, options.seed);
        let pacer = Pacer::new(options.pacing, options.concurrency);
        let pool = build_pool(options.concurrency);

        Self {
            source,
            options,
            backoff,
            pacer,
            sleeper: Arc::new(ThreadSleeper),
            pool,
        }
    }

    /// Replace the sleeper used for backoff and pacing
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the backoff policy, e.g. one built around a specific RNG
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetch every ID, retrying until each one is resolved
    ///
    /// Duplicate IDs are fetched once. When the report comes back, every
    /// distinct input ID is in exactly one of `records`, `permanent_failures`
    /// or `pending`.
    pub fn fetch_all<I>(&self, ids: I, cancel: &CancelToken) -> FetchReport
    where
        I: IntoIterator<Item = MessageId>,
    {
        let start = Instant::now();
        let limits = Limits {
            cancel,
            deadline: self.options.max_duration.and_then(|max| start.checked_add(max)),
        };
        let mut pending = dedupe(ids);
        let mut report = FetchReport::default();
        let total = pending.len();

        info!(
            "[FETCH] Fetching {} messages (batch size {}, {} attempts per batch, concurrency {})",
            total,
            self.options.batch_size.max(1),
            self.options.max_attempts_per_batch.max(1),
            self.options.concurrency.max(1)
        );

        let stop = loop {
            if pending.is_empty() {
                break StopReason::Completed;
            }
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if self.options.max_rounds.is_some_and(|max| report.rounds.len() >= max) {
                break StopReason::RoundLimit;
            }
            if limits.past_deadline() {
                break StopReason::DeadlineExceeded;
            }

            let round = report.rounds.len() + 1;
            let batches: Vec<&[MessageId]> = plan_batches(&pending, self.options.batch_size).collect();
            let mut stats = RoundStats {
                round,
                pending: pending.len(),
                batches: batches.len(),
                ..Default::default()
            };
            info!(
                "[FETCH] Round {}: {} pending in {} batches",
                round,
                stats.pending,
                stats.batches
            );

            let results = self.run_round(&batches, limits);

            let mut carried = Vec::new();
            for result in results {
                stats.succeeded += result.fetched.len();
                stats.retried += result.retry.len();
                stats.failed += result.failed.len();
                stats.skipped += result.skipped.len();
                stats.throttled_attempts += result.throttled_attempts;

                report.records.extend(result.fetched);
                for (id, error) in result.failed {
                    report.permanent_failures.insert(id, error);
                }
                carried.extend(result.retry);
                carried.extend(result.skipped);
            }

            info!(
                "[FETCH] Round {} done: {} fetched, {} to retry, {} failed permanently{}",
                round,
                stats.succeeded,
                stats.retried,
                stats.failed,
                if stats.skipped > 0 {
                    format!(", {} not attempted", stats.skipped)
                } else {
                    String::new()
                }
            );

            report.rounds.push(stats);
            pending = dedupe(carried);
        };

        match stop {
            StopReason::Completed => {}
            StopReason::Cancelled => {
                warn!(
                    "[FETCH] Cancelled with {} messages still pending",
                    pending.len()
                );
                report.pending = pending;
            }
            StopReason::RoundLimit | StopReason::DeadlineExceeded => {
                warn!(
                    "[FETCH] Giving up on {} messages after {} rounds ({:?})",
                    pending.len(),
                    report.rounds.len(),
                    stop
                );
                let rounds = report.rounds.len();
                for id in pending {
                    report.permanent_failures.insert(id, ItemError::exhausted(rounds));
                }
            }
        }

        info!(
            "[FETCH] Finished in {:.1}s: {} fetched, {} failed, {} pending of {}",
            start.elapsed().as_secs_f64(),
            report.records.len(),
            report.permanent_failures.len(),
            report.pending.len(),
            total
        );

        report.stop = stop;
        report
    }

    /// Run every batch of a round and wait for all of them
    fn run_round(&self, batches: &[&[MessageId]], limits: Limits<'_>) -> Vec<BatchResult> {
        match &self.pool {
            Some(pool) if batches.len() > 1 => pool.install(|| {
                batches
                    .par_iter()
                    .map(|batch| self.process_batch(batch, limits))
                    .collect()
            }),
            _ => batches
                .iter()
                .map(|batch| self.process_batch(batch, limits))
                .collect(),
        }
    }

    /// Submit one batch, retrying in place while it is throttled
    ///
    /// A batch reached after cancellation or the deadline is not submitted;
    /// its members are carried over and resolved by the round loop.
    fn process_batch(&self, batch: &[MessageId], limits: Limits<'_>) -> BatchResult {
        let mut result = BatchResult::default();
        if limits.cancel.is_cancelled() || limits.past_deadline() {
            result.skipped = batch.to_vec();
            return result;
        }

        let max_attempts = self.options.max_attempts_per_batch.max(1);
        for attempt in 0..max_attempts {
            if attempt > 0 && limits.past_deadline() {
                debug!("[FETCH] Deadline reached while retrying a batch of {}", batch.len());
                result.retry.extend_from_slice(batch);
                break;
            }
            // Every submission, retries included, draws from the shared budget
            self.pacer.before_batch(self.sleeper.as_ref());
            match self.source.get_batch(batch) {
                Ok(outcomes) => {
                    fold_outcomes(batch, outcomes, &mut result);
                    break;
                }
                Err(BatchError::RateLimited { retry_after }) => {
                    result.throttled_attempts += 1;
                    if attempt + 1 == max_attempts {
                        warn!(
                            "[FETCH] Batch of {} still rate limited after {} attempts, deferring to next round",
                            batch.len(),
                            max_attempts
                        );
                        result.retry.extend_from_slice(batch);
                        break;
                    }
                    let delay = self.backoff.delay(attempt).max(retry_after.unwrap_or_default());
                    info!(
                        "[FETCH] Rate limit hit, retrying batch in {:.2}s (attempt {}/{})",
                        delay.as_secs_f64(),
                        attempt + 1,
                        max_attempts
                    );
                    self.sleeper.sleep(delay);
                }
                Err(BatchError::Transport(e)) => {
                    warn!(
                        "[FETCH] Batch of {} failed, deferring to next round: {:#}",
                        batch.len(),
                        e
                    );
                    result.retry.extend_from_slice(batch);
                    break;
                }
            }
        }

        self.pacer.after_batch(self.sleeper.as_ref());
        result
    }
}

/// Sort a successful batch response into fetched / retry / failed
fn fold_outcomes(
    batch: &[MessageId],
    outcomes: Vec<(MessageId, ItemOutcome)>,
    result: &mut BatchResult,
) {
    let members: HashSet<&MessageId> = batch.iter().collect();
    let mut answered: HashSet<MessageId> = HashSet::with_capacity(batch.len());

    for (id, outcome) in outcomes {
        if !members.contains(&id) {
            debug!("[FETCH] Ignoring outcome for unrequested message {}", id);
            continue;
        }
        if !answered.insert(id.clone()) {
            continue;
        }
        match outcome {
            ItemOutcome::Fetched(message) if message.id != id.as_str() => {
                warn!(
                    "[FETCH] Response for {} carried message {}, will be retried",
                    id, message.id
                );
                result.retry.push(id);
            }
            ItemOutcome::Fetched(message) => result.fetched.push(message),
            ItemOutcome::Failed(error) if error.is_retryable() => {
                debug!("[FETCH] {} will be retried: {}", id, error);
                result.retry.push(id);
            }
            ItemOutcome::Failed(error) => {
                warn!("[FETCH] Error fetching {}: {}", id, error);
                result.failed.push((id, error));
            }
        }
    }

    for id in batch {
        if !answered.contains(id) {
            debug!("[FETCH] No response for {}, will be retried", id);
            result.retry.push(id.clone());
        }
    }
}

/// Drop repeated IDs, keeping first-seen order
fn dedupe(ids: impl IntoIterator<Item = MessageId>) -> Vec<MessageId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn build_pool(concurrency: usize) -> Option<rayon::ThreadPool> {
    if concurrency <= 1 {
        return None;
    }
    match rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency)
        .thread_name(|i| format!("sieve-fetch-{i}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!("[FETCH] Could not start {} fetch workers, running sequentially: {}", concurrency, e);
            None
        }
    }
}
