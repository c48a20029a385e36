//! Mailbox actions module
//!
//! Moves low-priority mail under a review label and, on request, into the
//! trash. Also builds the unsubscribe report.

mod handler;
mod report;

pub use handler::{LabelApi, REVIEW_LABEL, ReviewActions, TrashOutcome};
pub use report::{render_unsubscribe_report, unsubscribe_report, write_unsubscribe_csv};
