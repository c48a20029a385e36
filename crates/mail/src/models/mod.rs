//! Domain models for mail entities

mod label;
mod message;
mod outcome;

pub use label::{Label, LabelId, UnknownLabel};
pub use message::{EmailRecord, MessageId};
pub use outcome::{FailureKind, ItemError, ItemOutcome};
