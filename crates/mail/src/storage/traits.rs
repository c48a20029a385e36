//! Storage trait definitions

use crate::models::{EmailRecord, Label, MessageId};
use anyhow::Result;
use serde::Serialize;

/// One row of the unsubscribe report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsubscribeLink {
    pub id: MessageId,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub url: String,
}

/// Trait for record storage operations
///
/// Abstracts over the in-memory and SQLite backends. Records are keyed by
/// message ID; writing the same record twice leaves one row.
pub trait RecordStore: Send + Sync {
    /// Insert or update records in one transaction
    ///
    /// Fetched fields are replaced. A label or reviewed flag already stored
    /// for the ID is kept. Returns the number of records written.
    fn upsert_records(&self, records: &[EmailRecord]) -> Result<usize>;

    /// Get a record by ID
    fn get_record(&self, id: &MessageId) -> Result<Option<EmailRecord>>;

    /// Check if a record exists
    fn has_record(&self, id: &MessageId) -> Result<bool>;

    /// Count all records
    fn count_records(&self) -> Result<usize>;

    /// Records without a label, ordered by ID
    fn list_unclassified(&self, limit: usize) -> Result<Vec<EmailRecord>>;

    /// Store classifier labels; IDs that are not stored are ignored
    ///
    /// Returns the number of records updated.
    fn set_labels(&self, labels: &[(MessageId, Label)]) -> Result<usize>;

    /// IDs carrying `label` that have not been through review yet
    fn list_unreviewed(&self, label: Label) -> Result<Vec<MessageId>>;

    /// Flag records as reviewed
    fn mark_reviewed(&self, ids: &[MessageId]) -> Result<usize>;

    /// Records that carry an unsubscribe URL, ordered by sender
    fn list_unsubscribe_links(&self) -> Result<Vec<UnsubscribeLink>>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
