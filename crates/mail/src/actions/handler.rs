//! Review actions for low-priority mail
//!
//! Coordinates between the Gmail label API and local storage.

use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;

use crate::gmail::api::GmailLabel;
use crate::models::{Label, LabelId, MessageId};
use crate::storage::RecordStore;

/// Name of the label applied to messages awaiting manual review
pub const REVIEW_LABEL: &str = "Review_Not_Important";

/// Most IDs `batchModify` accepts per call
const MODIFY_CHUNK: usize = 1000;

/// Chunk size for trash moves, kept smaller to avoid request timeouts
const TRASH_CHUNK: usize = 500;

/// Label mutations needed by [`ReviewActions`]
pub trait LabelApi: Send + Sync {
    fn list_labels(&self) -> Result<Vec<GmailLabel>>;

    fn create_label(&self, name: &str) -> Result<GmailLabel>;

    /// Add and remove labels on up to 1000 messages
    fn batch_modify(&self, ids: &[&str], add: &[&str], remove: &[&str]) -> Result<()>;
}

/// Result of moving messages to trash
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrashOutcome {
    pub moved: usize,
    pub failed_chunks: usize,
}

/// Handler for review actions
///
/// Actions are performed in two steps:
/// 1. Call Gmail API to update server state
/// 2. Update local storage to reflect the change
///
/// Local state only changes once the server accepted the mutation.
pub struct ReviewActions {
    gmail: Arc<dyn LabelApi>,
    store: Arc<dyn RecordStore>,
}

impl ReviewActions {
    /// Create a new review handler
    pub fn new(gmail: Arc<dyn LabelApi>, store: Arc<dyn RecordStore>) -> Self {
        Self { gmail, store }
    }

    /// ID of the review label, creating the label if the mailbox lacks it
    pub fn ensure_review_label(&self) -> Result<String> {
        let labels = self.gmail.list_labels().context("Failed to list labels")?;
        if let Some(label) = labels.into_iter().find(|l| l.name == REVIEW_LABEL) {
            info!("[REVIEW] Found label {}", REVIEW_LABEL);
            return Ok(label.id);
        }

        let label = self
            .gmail
            .create_label(REVIEW_LABEL)
            .with_context(|| format!("Failed to create label {REVIEW_LABEL}"))?;
        info!("[REVIEW] Created label {}", REVIEW_LABEL);
        Ok(label.id)
    }

    /// Apply the review label to every unreviewed NOT IMPORTANT message
    ///
    /// Messages are marked reviewed locally once all chunks were labeled.
    /// Returns the labeled IDs.
    pub fn label_not_important(&self, review_label_id: &str) -> Result<Vec<MessageId>> {
        let ids = self.store.list_unreviewed(Label::NotImportant)?;
        if ids.is_empty() {
            info!("[REVIEW] No unreviewed NOT IMPORTANT messages");
            return Ok(ids);
        }

        let id_strs: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        for chunk in id_strs.chunks(MODIFY_CHUNK) {
            self.gmail
                .batch_modify(chunk, &[review_label_id], &[])
                .context("Failed to apply review label")?;
        }

        // Update local storage
        self.store.mark_reviewed(&ids)?;

        info!("[REVIEW] Labeled {} messages with {}", ids.len(), REVIEW_LABEL);
        Ok(ids)
    }

    /// Move messages to trash
    ///
    /// A failed chunk is logged and skipped; the remaining chunks still run.
    pub fn move_to_trash(&self, ids: &[MessageId]) -> TrashOutcome {
        let mut outcome = TrashOutcome::default();
        if ids.is_empty() {
            return outcome;
        }

        let id_strs: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        for (i, chunk) in id_strs.chunks(TRASH_CHUNK).enumerate() {
            match self.gmail.batch_modify(chunk, &[LabelId::TRASH], &[]) {
                Ok(()) => {
                    outcome.moved += chunk.len();
                    info!("[REVIEW] Moved {} messages to trash (chunk {})", chunk.len(), i + 1);
                }
                Err(e) => {
                    outcome.failed_chunks += 1;
                    warn!("[REVIEW] Failed to move chunk {} to trash: {:#}", i + 1, e);
                }
            }
        }

        info!("[REVIEW] Moved {} of {} messages to trash", outcome.moved, ids.len());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailRecord;
    use crate::storage::InMemoryStore;
    use anyhow::bail;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeLabels {
        existing: Vec<GmailLabel>,
        created: Mutex<Vec<String>>,
        modified: Mutex<Vec<(usize, Vec<String>)>>,
        fail_call: Option<usize>,
    }

    impl LabelApi for FakeLabels {
        fn list_labels(&self) -> Result<Vec<GmailLabel>> {
            Ok(self.existing.clone())
        }

        fn create_label(&self, name: &str) -> Result<GmailLabel> {
            self.created.lock().unwrap().push(name.to_string());
            Ok(GmailLabel {
                id: "Label_42".to_string(),
                name: name.to_string(),
            })
        }

        fn batch_modify(&self, ids: &[&str], add: &[&str], _remove: &[&str]) -> Result<()> {
            let mut modified = self.modified.lock().unwrap();
            let call = modified.len();
            modified.push((ids.len(), add.iter().map(|s| s.to_string()).collect()));
            if self.fail_call == Some(call) {
                bail!("HTTP 500");
            }
            Ok(())
        }
    }

    fn store_with(n: usize, label: Label) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let records: Vec<_> = (0..n).map(|i| EmailRecord::new(format!("m{i:05}"))).collect();
        store.upsert_records(&records).unwrap();
        let labels: Vec<_> = records.iter().map(|r| (r.id.clone(), label)).collect();
        store.set_labels(&labels).unwrap();
        store
    }

    #[test]
    fn test_existing_label_is_reused() {
        let api = Arc::new(FakeLabels {
            existing: vec![GmailLabel {
                id: "Label_7".to_string(),
                name: REVIEW_LABEL.to_string(),
            }],
            ..Default::default()
        });
        let actions = ReviewActions::new(api.clone(), Arc::new(InMemoryStore::new()));
        assert_eq!(actions.ensure_review_label().unwrap(), "Label_7");
        assert!(api.created.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_label_is_created() {
        let api = Arc::new(FakeLabels::default());
        let actions = ReviewActions::new(api.clone(), Arc::new(InMemoryStore::new()));
        assert_eq!(actions.ensure_review_label().unwrap(), "Label_42");
        assert_eq!(*api.created.lock().unwrap(), vec![REVIEW_LABEL.to_string()]);
    }

    #[test]
    fn test_label_not_important_chunks_and_marks_reviewed() {
        let api = Arc::new(FakeLabels::default());
        let store = store_with(2500, Label::NotImportant);
        let actions = ReviewActions::new(api.clone(), store.clone());

        let labeled = actions.label_not_important("Label_42").unwrap();
        assert_eq!(labeled.len(), 2500);

        let modified = api.modified.lock().unwrap();
        let sizes: Vec<_> = modified.iter().map(|(n, _)| *n).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert!(modified.iter().all(|(_, add)| add == &vec!["Label_42".to_string()]));
        assert!(store.list_unreviewed(Label::NotImportant).unwrap().is_empty());
    }

    #[test]
    fn test_important_messages_are_left_alone() {
        let api = Arc::new(FakeLabels::default());
        let actions = ReviewActions::new(api.clone(), store_with(3, Label::Important));
        assert!(actions.label_not_important("Label_42").unwrap().is_empty());
        assert!(api.modified.lock().unwrap().is_empty());
    }

    #[test]
    fn test_label_failure_leaves_messages_unreviewed() {
        let api = Arc::new(FakeLabels {
            fail_call: Some(0),
            ..Default::default()
        });
        let store = store_with(3, Label::NotImportant);
        let actions = ReviewActions::new(api, store.clone());
        assert!(actions.label_not_important("Label_42").is_err());
        assert_eq!(store.list_unreviewed(Label::NotImportant).unwrap().len(), 3);
    }

    #[test]
    fn test_trash_continues_after_failed_chunk() {
        let api = Arc::new(FakeLabels {
            fail_call: Some(1),
            ..Default::default()
        });
        let actions = ReviewActions::new(api.clone(), Arc::new(InMemoryStore::new()));
        let ids: Vec<_> = (0..1200).map(|i| MessageId::new(format!("m{i}"))).collect();

        let outcome = actions.move_to_trash(&ids);
        assert_eq!(
            outcome,
            TrashOutcome {
                moved: 700,
                failed_chunks: 1
            }
        );
        let modified = api.modified.lock().unwrap();
        assert_eq!(modified.len(), 3);
        assert!(modified.iter().all(|(_, add)| add == &vec!["TRASH".to_string()]));
    }
}
