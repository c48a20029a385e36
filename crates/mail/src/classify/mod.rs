//! Priority classification of stored messages
//!
//! Unlabeled records are sent to a [`Classifier`] in small chunks and the
//! answers written back to the store.

mod gemini;
mod prompt;

pub use gemini::{API_KEY_ENV, GeminiClassifier};
pub use prompt::{ClassifyRow, anonymize, build_prompt, parse_classifications};

use anyhow::Result;
use log::{info, warn};
use std::collections::HashMap;
use std::time::Duration;

use crate::models::{Label, MessageId};
use crate::storage::RecordStore;
use crate::sync::Sleeper;

/// Assigns a priority label to messages
pub trait Classifier: Send + Sync {
    /// Label as many rows as possible
    ///
    /// An empty map means the classifier gave no usable answer.
    fn classify(&self, rows: &[ClassifyRow]) -> Result<HashMap<MessageId, Label>>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// The same chunk came back unlabeled too many times in a row
    #[error("No usable classification for {} messages after {attempts} attempts", ids.len())]
    NoAnswer {
        attempts: usize,
        ids: Vec<MessageId>,
    },
    #[error("Record store failed: {0:#}")]
    Store(#[source] anyhow::Error),
}

/// Tuning for [`classify_pending`]
#[derive(Debug, Clone)]
pub struct ClassifyOptions {
    /// Rows sent per classifier call
    pub chunk_size: usize,
    /// Re-submissions of an unanswered chunk before giving up
    pub max_resubmits: usize,
    /// Pause before re-submitting
    pub retry_pause: Duration,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            max_resubmits: 3,
            retry_pause: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifyStats {
    pub classified: usize,
    pub important: usize,
    pub not_important: usize,
    /// Classifier calls made, including re-submissions
    pub calls: usize,
}

/// Classify every unlabeled record in `store`
///
/// Each pass takes the first `chunk_size` unlabeled records. Rows the
/// classifier skipped come back in a later pass. A pass that labels nothing
/// re-submits after `retry_pause`; more than `max_resubmits` such passes in
/// a row end the run with [`ClassifyError::NoAnswer`].
pub fn classify_pending(
    store: &dyn RecordStore,
    classifier: &dyn Classifier,
    options: &ClassifyOptions,
    sleeper: &dyn Sleeper,
) -> Result<ClassifyStats, ClassifyError> {
    let mut stats = ClassifyStats::default();
    let mut empty_passes = 0;

    loop {
        let records = store
            .list_unclassified(options.chunk_size.max(1))
            .map_err(ClassifyError::Store)?;
        if records.is_empty() {
            break;
        }

        let rows: Vec<ClassifyRow> = records.iter().map(ClassifyRow::from_record).collect();
        stats.calls += 1;
        let labels = match classifier.classify(&rows) {
            Ok(labels) => labels,
            Err(e) => {
                warn!("[CLASSIFY] Classifier error: {:#}", e);
                HashMap::new()
            }
        };

        let mut pairs: Vec<(MessageId, Label)> = labels
            .into_iter()
            .filter(|(id, _)| rows.iter().any(|r| &r.id == id))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let updated = if pairs.is_empty() {
            0
        } else {
            store.set_labels(&pairs).map_err(ClassifyError::Store)?
        };

        if updated == 0 {
            empty_passes += 1;
            if empty_passes > options.max_resubmits {
                return Err(ClassifyError::NoAnswer {
                    attempts: empty_passes,
                    ids: rows.into_iter().map(|r| r.id).collect(),
                });
            }
            warn!(
                "[CLASSIFY] No usable answer for {} messages, re-submitting ({}/{})",
                rows.len(),
                empty_passes,
                options.max_resubmits
            );
            sleeper.sleep(options.retry_pause);
            continue;
        }

        empty_passes = 0;
        stats.classified += updated;
        for (_, label) in &pairs {
            match label {
                Label::Important => stats.important += 1,
                Label::NotImportant => stats.not_important += 1,
            }
        }
        info!("[CLASSIFY] Classified {} messages so far", stats.classified);
    }

    info!(
        "[CLASSIFY] All messages classified ({} important, {} not important)",
        stats.important, stats.not_important
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailRecord;
    use crate::storage::InMemoryStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: Duration) {}
    }

    /// Plays back scripted answers; labels rows by position
    struct Scripted {
        answers: Mutex<VecDeque<Option<Vec<Label>>>>,
    }

    impl Scripted {
        fn new(answers: Vec<Option<Vec<Label>>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
            }
        }
    }

    impl Classifier for Scripted {
        fn classify(&self, rows: &[ClassifyRow]) -> Result<HashMap<MessageId, Label>> {
            let next = self.answers.lock().unwrap().pop_front().flatten().unwrap_or_default();
            Ok(rows.iter().map(|r| r.id.clone()).zip(next).collect())
        }
    }

    fn store(n: usize) -> InMemoryStore {
        let store = InMemoryStore::new();
        let records: Vec<_> = (0..n).map(|i| EmailRecord::new(format!("m{i}"))).collect();
        store.upsert_records(&records).unwrap();
        store
    }

    fn options(chunk_size: usize, max_resubmits: usize) -> ClassifyOptions {
        ClassifyOptions {
            chunk_size,
            max_resubmits,
            retry_pause: Duration::ZERO,
        }
    }

    #[test]
    fn test_classifies_everything_in_chunks() {
        use Label::*;
        let store = store(5);
        let classifier = Scripted::new(vec![
            Some(vec![Important, NotImportant]),
            Some(vec![NotImportant, NotImportant]),
            Some(vec![Important]),
        ]);
        let stats = classify_pending(&store, &classifier, &options(2, 1), &NoSleep).unwrap();
        assert_eq!(stats.classified, 5);
        assert_eq!(stats.important, 2);
        assert_eq!(stats.not_important, 3);
        assert_eq!(stats.calls, 3);
        assert!(store.list_unclassified(10).unwrap().is_empty());
    }

    #[test]
    fn test_empty_answer_resubmits_same_chunk() {
        let store = store(2);
        let classifier = Scripted::new(vec![None, Some(vec![Label::Important, Label::Important])]);
        let stats = classify_pending(&store, &classifier, &options(10, 2), &NoSleep).unwrap();
        assert_eq!(stats.classified, 2);
        assert_eq!(stats.calls, 2);
    }

    #[test]
    fn test_gives_up_after_max_resubmits() {
        let store = store(3);
        let classifier = Scripted::new(vec![]);
        let err = classify_pending(&store, &classifier, &options(10, 2), &NoSleep).unwrap_err();
        match err {
            ClassifyError::NoAnswer { attempts, ids } => {
                assert_eq!(attempts, 3);
                assert_eq!(ids.len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.list_unclassified(10).unwrap().len(), 3);
    }

    #[test]
    fn test_partial_answer_makes_progress() {
        let store = store(3);
        let classifier = Scripted::new(vec![
            Some(vec![Label::Important]),
            Some(vec![Label::NotImportant, Label::NotImportant]),
        ]);
        let stats = classify_pending(&store, &classifier, &options(3, 0), &NoSleep).unwrap();
        assert_eq!(stats.classified, 3);
    }
}
