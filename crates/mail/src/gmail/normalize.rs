//! Gmail API response normalization
//!
//! Converts a metadata-format Gmail message into an `EmailRecord`.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use super::api::GmailMessage;
use crate::models::{EmailRecord, MessageId};

/// First bracketed http(s) URI of a `List-Unsubscribe` value
static UNSUBSCRIBE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(https?://[^>]+)>").expect("valid regex"));

/// Normalize a Gmail API message to an `EmailRecord`
///
/// Total over any message the API can return: missing payloads and headers
/// become `None` fields.
pub fn normalize_metadata(gmail_msg: &GmailMessage) -> EmailRecord {
    let date = extract_header(gmail_msg, "Date");
    let received_at = date.as_deref().and_then(parse_date);

    EmailRecord {
        id: MessageId::new(&gmail_msg.id),
        sender: extract_header(gmail_msg, "From"),
        subject: extract_header(gmail_msg, "Subject"),
        date,
        received_at,
        snippet: gmail_msg
            .snippet
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(decode_html_entities),
        unsubscribe_url: extract_header(gmail_msg, "List-Unsubscribe")
            .and_then(|v| extract_unsubscribe_url(&v)),
        label: None,
    }
}

/// Extract a non-empty header value by name (first match wins)
fn extract_header(msg: &GmailMessage, name: &str) -> Option<String> {
    msg.payload
        .as_ref()?
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Pick the first http(s) target of a `List-Unsubscribe` header
fn extract_unsubscribe_url(header: &str) -> Option<String> {
    UNSUBSCRIBE_URL
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse an RFC 2822 `Date` header, tolerating a trailing `(UTC)`-style comment
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = match value.find(" (") {
        Some(idx) if value.ends_with(')') => &value[..idx],
        _ => value,
    };
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
