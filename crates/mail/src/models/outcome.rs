//! Per-message fetch outcomes and failure classification

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::gmail::api::GmailMessage;

/// Why a single message could not be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Throttled by the service; retried in a later round
    RateLimited,
    /// The whole batch request failed for a non-throttling reason; retried in
    /// a later round
    TransientTransport,
    /// Not found, malformed, forbidden, ... Never retried.
    PermanentItem,
    /// Still unresolved when the round or time bound ran out
    RetriesExhausted,
}

impl FailureKind {
    /// Whether an item with this failure goes back into the pending set
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::RateLimited | FailureKind::TransientTransport)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::RateLimited => "rate limited",
            FailureKind::TransientTransport => "transient transport error",
            FailureKind::PermanentItem => "permanent item error",
            FailureKind::RetriesExhausted => "retries exhausted",
        };
        f.write_str(s)
    }
}

/// A classified failure for one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct ItemError {
    pub kind: FailureKind,
    /// HTTP status of the sub-response, when there was one
    pub status: Option<u16>,
    pub message: String,
}

/// Gmail error reasons that signal throttling even under a 403
const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

impl ItemError {
    pub fn new(kind: FailureKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    /// Classify a failed sub-response from its status and Gmail error reason
    pub fn from_status(status: u16, reason: Option<&str>, message: impl Into<String>) -> Self {
        let throttled =
            status == 429 || (status == 403 && reason.is_some_and(|r| RATE_LIMIT_REASONS.contains(&r)));
        let kind = if throttled {
            FailureKind::RateLimited
        } else {
            FailureKind::PermanentItem
        };
        Self::new(kind, Some(status), message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransientTransport, None, message)
    }

    /// Final disposition of an ID that never resolved before a bound was hit
    pub fn exhausted(rounds: usize) -> Self {
        Self::new(
            FailureKind::RetriesExhausted,
            None,
            format!("still pending after {rounds} rounds"),
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Result of fetching one member of a batch
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Fetched(GmailMessage),
    Failed(ItemError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_429_is_rate_limited() {
        let err = ItemError::from_status(429, None, "Too many requests");
        assert_eq!(err.kind, FailureKind::RateLimited);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_403_rate_limit_reason_is_rate_limited() {
        let err = ItemError::from_status(403, Some("userRateLimitExceeded"), "slow down");
        assert_eq!(err.kind, FailureKind::RateLimited);
    }

    #[test]
    fn test_403_other_reason_is_permanent() {
        let err = ItemError::from_status(403, Some("forbidden"), "no access");
        assert_eq!(err.kind, FailureKind::PermanentItem);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_404_and_500_are_permanent_items() {
        assert_eq!(ItemError::from_status(404, None, "gone").kind, FailureKind::PermanentItem);
        assert_eq!(ItemError::from_status(500, None, "boom").kind, FailureKind::PermanentItem);
    }

    #[test]
    fn test_display_includes_status() {
        let err = ItemError::from_status(404, None, "Requested entity was not found.");
        assert_eq!(
            err.to_string(),
            "permanent item error (HTTP 404): Requested entity was not found."
        );
        assert_eq!(
            ItemError::transient("reset").to_string(),
            "transient transport error: reset"
        );
    }

    #[test]
    fn test_exhausted_is_terminal() {
        let err = ItemError::exhausted(3);
        assert_eq!(err.kind, FailureKind::RetriesExhausted);
        assert!(!err.is_retryable());
    }
}
