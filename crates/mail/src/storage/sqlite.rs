//! SQLite-based record storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{RecordStore, UnsubscribeLink};
use crate::models::{EmailRecord, Label, MessageId};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE emails (
                id TEXT PRIMARY KEY,
                sender TEXT,
                subject TEXT,
                date TEXT,
                snippet TEXT,
                category TEXT,
                unsubscribe_url TEXT,
                reviewed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_emails_category ON emails(category, reviewed);
            "#,
        ),
        // Migration 2: Parsed receive time
        M::up(
            r#"
            ALTER TABLE emails ADD COLUMN received_at TEXT;
            "#,
        ),
    ])
}

const RECORD_COLUMNS: &str =
    "id, sender, subject, date, received_at, snippet, unsubscribe_url, category";

/// SQLite-based record storage
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and bring its schema up to date
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets readers run during the upsert transaction; NORMAL sync is
        // safe under WAL.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        Self::with_connection(conn)
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<EmailRecord> {
    let id: String = row.get(0)?;
    let received_at: Option<String> = row.get(4)?;
    let category: Option<String> = row.get(7)?;

    let received_at = received_at.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    });
    let label = category.and_then(|c| match c.parse::<Label>() {
        Ok(label) => Some(label),
        Err(e) => {
            warn!("[STORE] Ignoring stored category for {}: {}", id, e);
            None
        }
    });

    Ok(EmailRecord {
        id: MessageId::new(id),
        sender: row.get(1)?,
        subject: row.get(2)?,
        date: row.get(3)?,
        received_at,
        snippet: row.get(5)?,
        unsubscribe_url: row.get(6)?,
        label,
    })
}

impl RecordStore for SqliteStore {
    fn upsert_records(&self, records: &[EmailRecord]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        {
            // ON CONFLICT DO UPDATE rather than INSERT OR REPLACE: a replace
            // would reset category and reviewed on every re-fetch.
            let mut stmt = tx.prepare(
                "INSERT INTO emails
                 (id, sender, subject, date, received_at, snippet, unsubscribe_url, category)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    sender = excluded.sender,
                    subject = excluded.subject,
                    date = excluded.date,
                    received_at = excluded.received_at,
                    snippet = excluded.snippet,
                    unsubscribe_url = excluded.unsubscribe_url,
                    category = COALESCE(emails.category, excluded.category)",
            )?;

            for record in records {
                stmt.execute(params![
                    record.id.as_str(),
                    record.sender,
                    record.subject,
                    record.date,
                    record.received_at.map(|dt| dt.to_rfc3339()),
                    record.snippet,
                    record.unsubscribe_url,
                    record.label.map(|l| l.as_str()),
                ])?;
            }
        }

        tx.commit().context("Failed to commit record upsert")?;
        debug!("[STORE] Upserted {} records", records.len());
        Ok(records.len())
    }

    fn get_record(&self, id: &MessageId) -> Result<Option<EmailRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM emails WHERE id = ?"),
                [id.as_str()],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn has_record(&self, id: &MessageId) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM emails WHERE id = ?)",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn count_records(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn list_unclassified(&self, limit: usize) -> Result<Vec<EmailRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM emails WHERE category IS NULL ORDER BY id LIMIT ?"
        ))?;
        let records = stmt
            .query_map([limit as i64], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn set_labels(&self, labels: &[(MessageId, Label)]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE emails SET category = ? WHERE id = ?")?;
            for (id, label) in labels {
                updated += stmt.execute(params![label.as_str(), id.as_str()])?;
            }
        }
        tx.commit().context("Failed to commit labels")?;
        Ok(updated)
    }

    fn list_unreviewed(&self, label: Label) -> Result<Vec<MessageId>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id FROM emails WHERE category = ? AND reviewed = 0 ORDER BY id")?;
        let ids = stmt
            .query_map([label.as_str()], |row| row.get::<_, String>(0))?
            .map(|r| r.map(MessageId::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn mark_reviewed(&self, ids: &[MessageId]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE emails SET reviewed = 1 WHERE id = ?")?;
            for id in ids {
                updated += stmt.execute([id.as_str()])?;
            }
        }
        tx.commit().context("Failed to commit reviewed flags")?;
        Ok(updated)
    }

    fn list_unsubscribe_links(&self) -> Result<Vec<UnsubscribeLink>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, sender, subject, unsubscribe_url FROM emails
             WHERE unsubscribe_url IS NOT NULL
             ORDER BY sender, id",
        )?;
        let links = stmt
            .query_map([], |row| {
                Ok(UnsubscribeLink {
                    id: MessageId::new(row.get::<_, String>(0)?),
                    sender: row.get(1)?,
                    subject: row.get(2)?,
                    url: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM emails", [])?;
        Ok(())
    }
}
