//! Gmail batch request encoding and response decoding
//!
//! A batch is one `multipart/mixed` POST whose parts are embedded HTTP
//! requests. The response mirrors it: one part per sub-request, each holding
//! an HTTP status line, headers and a JSON body. Parts are matched back to
//! message IDs through `Content-ID: <response-{id}>`. Parts without a
//! `Content-ID` fall back to position; parts naming an unknown ID are skipped.

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashSet;

use super::METADATA_HEADERS;
use super::api::{ErrorResponse, GmailMessage};
use crate::models::{ItemError, ItemOutcome, MessageId};

/// Relative API path fetching one message's metadata
pub fn metadata_path(id: &MessageId) -> String {
    let mut path = format!("/gmail/v1/users/me/messages/{}?format=metadata", id.as_str());
    for header in METADATA_HEADERS {
        path.push_str("&metadataHeaders=");
        path.push_str(header);
    }
    path
}

/// An encoded multipart batch of metadata GETs
#[derive(Debug)]
pub struct BatchRequest {
    boundary: String,
    body: String,
}

impl BatchRequest {
    /// Encode one GET per ID
    pub fn metadata(ids: &[MessageId]) -> Self {
        let boundary = format!("sieve_batch_{:016x}", rand::random::<u64>());
        let mut body = String::new();
        for id in ids {
            body.push_str(&format!("--{boundary}\r\n"));
            body.push_str("Content-Type: application/http\r\n");
            body.push_str(&format!("Content-ID: <{}>\r\n\r\n", id.as_str()));
            body.push_str(&format!("GET {}\r\n\r\n", metadata_path(id)));
        }
        body.push_str(&format!("--{boundary}--\r\n"));
        Self { boundary, body }
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Decode a batch response into one outcome per recognized member
///
/// Members the response says nothing about are simply absent from the result.
/// Fails only when the response as a whole cannot be split into parts.
pub fn decode_batch_response(
    content_type: &str,
    body: &str,
    sent: &[MessageId],
) -> Result<Vec<(MessageId, ItemOutcome)>> {
    let boundary = content_type
        .split(';')
        .find_map(|part| part.trim().strip_prefix("boundary="))
        .map(|b| b.trim_matches('"'))
        .filter(|b| !b.is_empty())
        .context("Batch response has no multipart boundary")?;

    let separator = format!("--{boundary}");
    let mut outcomes = Vec::with_capacity(sent.len());
    let mut seen: HashSet<&MessageId> = HashSet::new();

    let parts = body
        .split(separator.as_str())
        .map(|p| p.trim())
        .filter(|p| !p.is_empty() && !p.starts_with("--"));

    for (position, part) in parts.enumerate() {
        let normalized = part.replace("\r\n", "\n");
        let Some((outer, inner)) = normalized.split_once("\n\n") else {
            continue;
        };

        // Position is only trusted for parts without a Content-ID
        let id = match content_id(outer) {
            Some(cid) => sent.iter().find(|id| id.as_str() == cid),
            None => sent.get(position),
        };
        let Some(id) = id else {
            debug!("[FETCH] Skipping batch part {} with no matching request", position);
            continue;
        };
        if !seen.insert(id) {
            continue;
        }

        if let Some(outcome) = decode_part(inner) {
            outcomes.push((id.clone(), outcome));
        }
    }

    Ok(outcomes)
}

/// Extract the message ID from a part's `Content-ID` header
fn content_id(headers: &str) -> Option<&str> {
    headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("content-id") {
            return None;
        }
        let value = value.trim().trim_start_matches('<').trim_end_matches('>');
        Some(value.strip_prefix("response-").unwrap_or(value))
    })
}

/// Decode the embedded HTTP response of one part
fn decode_part(inner: &str) -> Option<ItemOutcome> {
    let inner = inner.trim_start();
    let (status_line, rest) = inner.split_once('\n').unwrap_or((inner, ""));
    let status: u16 = status_line.split_whitespace().nth(1)?.parse().ok()?;
    let json = rest.split_once("\n\n").map(|(_, b)| b).unwrap_or(rest).trim();

    if (200..300).contains(&status) {
        return Some(match serde_json::from_str::<GmailMessage>(json) {
            Ok(message) => ItemOutcome::Fetched(message),
            Err(e) => ItemOutcome::Failed(ItemError::from_status(
                status,
                None,
                format!("Unparseable message body: {e}"),
            )),
        });
    }

    let (reason, message) = match serde_json::from_str::<ErrorResponse>(json) {
        Ok(err) => (
            err.error.reason().map(str::to_string),
            err.error.message.unwrap_or_else(|| status_line.trim().to_string()),
        ),
        Err(_) => (None, status_line.trim().to_string()),
    };
    Some(ItemOutcome::Failed(ItemError::from_status(
        status,
        reason.as_deref(),
        message,
    )))
}
