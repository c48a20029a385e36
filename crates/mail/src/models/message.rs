//! Message identifiers and the normalized metadata record

use super::Label;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Canonical metadata for one message, ready to be stored
///
/// Optional headers that the message did not carry stay `None`; nothing is
/// filled in with placeholder text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Gmail message ID
    pub id: MessageId,
    /// Raw `From` header
    pub sender: Option<String>,
    /// `Subject` header
    pub subject: Option<String>,
    /// Raw `Date` header, exactly as sent
    pub date: Option<String>,
    /// `Date` header parsed as RFC 2822, when it parses
    pub received_at: Option<DateTime<Utc>>,
    /// Short plain-text preview provided by Gmail
    pub snippet: Option<String>,
    /// First http(s) target of the `List-Unsubscribe` header
    pub unsubscribe_url: Option<String>,
    /// Priority label assigned by the classifier
    pub label: Option<Label>,
}

impl EmailRecord {
    /// Create a record with only an ID set
    pub fn new(id: impl Into<MessageId>) -> Self {
        Self {
            id: id.into(),
            sender: None,
            subject: None,
            date: None,
            received_at: None,
            snippet: None,
            unsubscribe_url: None,
            label: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_unsubscribe_url(mut self, url: impl Into<String>) -> Self {
        self.unsubscribe_url = Some(url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_display_and_ordering() {
        let a = MessageId::new("18c0a");
        let b = MessageId::from("18c0b");
        assert_eq!(a.to_string(), "18c0a");
        assert!(a < b);
    }

    #[test]
    fn test_new_record_has_no_optional_fields() {
        let record = EmailRecord::new("m1");
        assert_eq!(record.id.as_str(), "m1");
        assert!(record.sender.is_none());
        assert!(record.subject.is_none());
        assert!(record.unsubscribe_url.is_none());
        assert!(record.label.is_none());
    }

    #[test]
    fn test_record_builder_methods() {
        let record = EmailRecord::new("m1")
            .with_sender("Alice <alice@example.com>")
            .with_subject("Hello")
            .with_snippet("Hi there")
            .with_unsubscribe_url("https://example.com/u");

        assert_eq!(record.sender.as_deref(), Some("Alice <alice@example.com>"));
        assert_eq!(record.subject.as_deref(), Some("Hello"));
        assert_eq!(record.snippet.as_deref(), Some("Hi there"));
        assert_eq!(record.unsubscribe_url.as_deref(), Some("https://example.com/u"));
    }
}
