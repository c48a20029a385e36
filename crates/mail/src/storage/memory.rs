//! In-memory storage implementation
//!
//! Used in tests and for dry runs that should not touch the database.

use anyhow::{Result, anyhow};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{RecordStore, UnsubscribeLink};
use crate::models::{EmailRecord, Label, MessageId};

struct StoredRecord {
    record: EmailRecord,
    reviewed: bool,
}

/// In-memory implementation of RecordStore
///
/// Records live in a BTreeMap so listings come back ordered by ID, matching
/// the SQLite store.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<MessageId, StoredRecord>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<MessageId, StoredRecord>>> {
        self.records
            .read()
            .map_err(|_| anyhow!("In-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<MessageId, StoredRecord>>> {
        self.records
            .write()
            .map_err(|_| anyhow!("In-memory store lock poisoned"))
    }
}

impl RecordStore for InMemoryStore {
    fn upsert_records(&self, records: &[EmailRecord]) -> Result<usize> {
        let mut map = self.write()?;
        for record in records {
            match map.get_mut(&record.id) {
                Some(existing) => {
                    let label = existing.record.label.or(record.label);
                    existing.record = EmailRecord {
                        label,
                        ..record.clone()
                    };
                }
                None => {
                    map.insert(
                        record.id.clone(),
                        StoredRecord {
                            record: record.clone(),
                            reviewed: false,
                        },
                    );
                }
            }
        }
        Ok(records.len())
    }

    fn get_record(&self, id: &MessageId) -> Result<Option<EmailRecord>> {
        Ok(self.read()?.get(id).map(|s| s.record.clone()))
    }

    fn has_record(&self, id: &MessageId) -> Result<bool> {
        Ok(self.read()?.contains_key(id))
    }

    fn count_records(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    fn list_unclassified(&self, limit: usize) -> Result<Vec<EmailRecord>> {
        Ok(self
            .read()?
            .values()
            .filter(|s| s.record.label.is_none())
            .take(limit)
            .map(|s| s.record.clone())
            .collect())
    }

    fn set_labels(&self, labels: &[(MessageId, Label)]) -> Result<usize> {
        let mut map = self.write()?;
        let mut updated = 0;
        for (id, label) in labels {
            if let Some(stored) = map.get_mut(id) {
                stored.record.label = Some(*label);
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn list_unreviewed(&self, label: Label) -> Result<Vec<MessageId>> {
        Ok(self
            .read()?
            .values()
            .filter(|s| !s.reviewed && s.record.label == Some(label))
            .map(|s| s.record.id.clone())
            .collect())
    }

    fn mark_reviewed(&self, ids: &[MessageId]) -> Result<usize> {
        let mut map = self.write()?;
        let mut updated = 0;
        for id in ids {
            if let Some(stored) = map.get_mut(id) {
                stored.reviewed = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn list_unsubscribe_links(&self) -> Result<Vec<UnsubscribeLink>> {
        let mut links: Vec<UnsubscribeLink> = self
            .read()?
            .values()
            .filter_map(|s| {
                let r = &s.record;
                r.unsubscribe_url.as_ref().map(|url| UnsubscribeLink {
                    id: r.id.clone(),
                    sender: r.sender.clone(),
                    subject: r.subject.clone(),
                    url: url.clone(),
                })
            })
            .collect();
        links.sort_by(|a, b| a.sender.cmp(&b.sender).then_with(|| a.id.cmp(&b.id)));
        Ok(links)
    }

    fn clear(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_is_idempotent() {
        let store = InMemoryStore::new();
        let record = EmailRecord::new("m1").with_subject("Hello");
        store.upsert_records(&[record.clone()]).unwrap();
        store.upsert_records(&[record]).unwrap();
        assert_eq!(store.count_records().unwrap(), 1);
    }

    #[test]
    fn test_upsert_keeps_label_and_reviewed() {
        let store = InMemoryStore::new();
        store.upsert_records(&[EmailRecord::new("m1")]).unwrap();
        store
            .set_labels(&[(MessageId::new("m1"), Label::NotImportant)])
            .unwrap();
        store.mark_reviewed(&[MessageId::new("m1")]).unwrap();

        store
            .upsert_records(&[EmailRecord::new("m1").with_subject("Updated")])
            .unwrap();

        let record = store.get_record(&MessageId::new("m1")).unwrap().unwrap();
        assert_eq!(record.subject.as_deref(), Some("Updated"));
        assert_eq!(record.label, Some(Label::NotImportant));
        assert!(store.list_unreviewed(Label::NotImportant).unwrap().is_empty());
    }

    #[test]
    fn test_unclassified_and_labels() {
        let store = InMemoryStore::new();
        let records: Vec<_> = ["c", "a", "b"].iter().map(|id| EmailRecord::new(*id)).collect();
        store.upsert_records(&records).unwrap();

        let pending = store.list_unclassified(2).unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let updated = store
            .set_labels(&[
                (MessageId::new("a"), Label::Important),
                (MessageId::new("zzz"), Label::Important),
            ])
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(store.list_unclassified(10).unwrap().len(), 2);
    }

    #[test]
    fn test_unsubscribe_links_sorted_by_sender() {
        let store = InMemoryStore::new();
        store
            .upsert_records(&[
                EmailRecord::new("1")
                    .with_sender("Zed <z@example.com>")
                    .with_unsubscribe_url("https://z.example.com/u"),
                EmailRecord::new("2").with_sender("No link"),
                EmailRecord::new("3")
                    .with_sender("Amy <a@example.com>")
                    .with_unsubscribe_url("https://a.example.com/u"),
            ])
            .unwrap();

        let links = store.list_unsubscribe_links().unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].url, "https://a.example.com/u");
        assert_eq!(links[1].id.as_str(), "1");
    }
}
