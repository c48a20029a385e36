//! Gmail API integration
//!
//! This module provides:
//! - Access token providers
//! - Gmail API client (listing, batched metadata fetch, label mutations)
//! - Multipart batch request encoding and response decoding
//! - Lazy paginated ID listing
//! - Response normalization to `EmailRecord`

mod batch;
mod client;
mod lister;
mod normalize;
mod token;

pub use batch::{BatchRequest, decode_batch_response, metadata_path};
pub use client::GmailClient;
pub use lister::{IdLister, ListPages, ListingError, list_all_ids};
pub use normalize::normalize_metadata;
pub use token::{StaticToken, TokenFile, TokenProvider};

/// Headers requested when fetching message metadata
pub const METADATA_HEADERS: &[&str] = &["From", "Subject", "Date", "List-Unsubscribe"];

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Message returned with `format=metadata`
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
        pub snippet: Option<String>,
        pub internal_date: Option<String>,
        pub payload: Option<MessagePayload>,
    }

    /// Message payload; only headers are present for metadata fetches
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub mime_type: Option<String>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Error envelope Gmail returns for failed requests and sub-requests
    #[derive(Debug, Deserialize)]
    pub struct ErrorResponse {
        pub error: ApiError,
    }

    #[derive(Debug, Deserialize)]
    pub struct ApiError {
        pub code: Option<u16>,
        pub message: Option<String>,
        #[serde(default)]
        pub errors: Vec<ApiErrorDetail>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ApiErrorDetail {
        pub reason: Option<String>,
        pub message: Option<String>,
    }

    impl ApiError {
        /// First machine-readable reason, e.g. `rateLimitExceeded`
        pub fn reason(&self) -> Option<&str> {
            self.errors.iter().find_map(|e| e.reason.as_deref())
        }
    }

    /// Response from listing labels
    #[derive(Debug, Deserialize)]
    pub struct ListLabelsResponse {
        pub labels: Option<Vec<GmailLabel>>,
    }

    /// A Gmail label as returned by the labels API
    #[derive(Debug, Clone, Deserialize)]
    pub struct GmailLabel {
        pub id: String,
        pub name: String,
    }

    /// Body for creating a user label
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CreateLabelRequest<'a> {
        pub name: &'a str,
        pub label_list_visibility: &'a str,
        pub message_list_visibility: &'a str,
    }

    /// Body for `messages/batchModify`
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BatchModifyRequest<'a> {
        pub ids: &'a [&'a str],
        #[serde(skip_serializing_if = "no_ids")]
        pub add_label_ids: &'a [&'a str],
        #[serde(skip_serializing_if = "no_ids")]
        pub remove_label_ids: &'a [&'a str],
    }

    fn no_ids(ids: &&[&str]) -> bool {
        ids.is_empty()
    }
}
