//! Mail crate - Gmail harvesting and triage
//!
//! This crate provides:
//! - Gmail API client (listing, multipart batch fetches, label mutations)
//! - Batched fetch engine with retry-until-convergence
//! - Normalization of Gmail metadata into `EmailRecord`s
//! - Record storage (in-memory and SQLite)
//! - Priority classification and review actions
//!
//! Everything is synchronous; concurrency inside the fetch engine uses a
//! rayon pool.

pub mod actions;
pub mod classify;
pub mod config;
pub mod gmail;
pub mod models;
pub mod storage;
pub mod sync;

pub use actions::{
    LabelApi, REVIEW_LABEL, ReviewActions, TrashOutcome, render_unsubscribe_report,
    unsubscribe_report, write_unsubscribe_csv,
};
pub use classify::{
    ClassifyError, ClassifyOptions, ClassifyRow, ClassifyStats, Classifier, GeminiClassifier,
    classify_pending,
};
pub use config::Settings;
pub use gmail::{
    GmailClient, IdLister, ListPages, ListingError, StaticToken, TokenFile, TokenProvider,
    list_all_ids, normalize_metadata,
};
pub use models::{EmailRecord, FailureKind, ItemError, ItemOutcome, Label, LabelId, MessageId};
pub use storage::{InMemoryStore, RecordStore, SqliteStore, UnsubscribeLink};
pub use sync::{
    BatchError, BatchSource, CancelToken, FetchEngine, FetchOptions, FetchReport, HarvestOptions,
    HarvestStats, RoundStats, Sleeper, StopReason, harvest,
};

