//! Fetch engine and harvest pipeline
//!
//! Runs are idempotent: anything interrupted can be re-run from scratch.

mod backoff;
mod cancel;
mod fetch;
mod pacing;
mod pipeline;

pub use backoff::Backoff;
pub use cancel::CancelToken;
pub use fetch::{
    BatchError, BatchSource, FetchEngine, FetchOptions, FetchReport, RoundStats, StopReason,
    plan_batches,
};
pub use pacing::{Pacer, Sleeper, ThreadSleeper};
pub use pipeline::{HarvestOptions, HarvestStats, harvest};
