//! Gmail API HTTP client
//!
//! Provides listing, batched metadata fetches and label mutations.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result, anyhow, bail};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use ureq::Body;
use ureq::http::Response;

use super::api::{
    BatchModifyRequest, CreateLabelRequest, ErrorResponse, GmailLabel, ListLabelsResponse,
    ListMessagesResponse,
};
use super::batch::{BatchRequest, decode_batch_response};
use super::lister::ListPages;
use super::token::TokenProvider;
use crate::actions::LabelApi;
use crate::models::{ItemOutcome, MessageId};
use crate::sync::{BatchError, BatchSource};

/// Gmail API client
pub struct GmailClient {
    tokens: Arc<dyn TokenProvider>,
    agent: ureq::Agent,
    api_base: String,
    batch_url: String,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";
    /// Gmail batch endpoint
    const BATCH_URL: &'static str = "https://gmail.googleapis.com/batch/gmail/v1";
    /// Largest page the list endpoint accepts
    pub const MAX_PAGE_SIZE: usize = 500;
    /// Per-request timeout
    const TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new Gmail client
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_endpoints(tokens, Self::BASE_URL, Self::BATCH_URL)
    }

    /// Create a client talking to non-default endpoints (e.g. a local proxy)
    pub fn with_endpoints(
        tokens: Arc<dyn TokenProvider>,
        api_base: impl Into<String>,
        batch_url: impl Into<String>,
    ) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Self::TIMEOUT))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            tokens,
            agent,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            batch_url: batch_url.into(),
        }
    }

    fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.tokens.access_token()?))
    }

    /// List one page of message IDs matching a Gmail search query
    ///
    /// # Arguments
    /// * `query` - Gmail search query (empty for the whole mailbox)
    /// * `max_results` - Page size, capped at 500
    /// * `page_token` - Token from the previous page
    pub fn list_messages(
        &self,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let url = list_messages_url(&self.api_base, query, max_results, page_token);

        let response = self
            .agent
            .get(&url)
            .header("Authorization", &self.bearer()?)
            .call()
            .context("Failed to send list messages request")?;

        read_json(response, "list messages")
    }

    /// Fetch metadata for every ID in one multipart batch request
    pub fn get_metadata_batch(
        &self,
        ids: &[MessageId],
    ) -> Result<Vec<(MessageId, ItemOutcome)>, BatchError> {
        let bearer = self.bearer().map_err(BatchError::Transport)?;
        let request = BatchRequest::metadata(ids);

        let mut response = self
            .agent
            .post(&self.batch_url)
            .header("Authorization", &bearer)
            .header("Content-Type", &request.content_type())
            .send(request.body())
            .map_err(|e| BatchError::Transport(anyhow!(e).context("Failed to send batch request")))?;

        let status = response.status().as_u16();
        let content_type = header_str(&response, "content-type").unwrap_or_default();
        let retry_after = header_str(&response, "retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| BatchError::Transport(anyhow!(e).context("Failed to read batch response")))?;

        if is_rate_limited(status, &body) {
            return Err(BatchError::RateLimited { retry_after });
        }
        if !(200..300).contains(&status) {
            return Err(BatchError::Transport(anyhow!(
                "Batch request failed: HTTP {}: {}",
                status,
                api_error_message(&body)
            )));
        }

        decode_batch_response(&content_type, &body, ids).map_err(BatchError::Transport)
    }

    // === Labels API ===

    /// List all labels in the user's mailbox
    pub fn list_labels(&self) -> Result<ListLabelsResponse> {
        let url = format!("{}/users/me/labels", self.api_base);

        let response = self
            .agent
            .get(&url)
            .header("Authorization", &self.bearer()?)
            .call()
            .context("Failed to send list labels request")?;

        read_json(response, "list labels")
    }

    /// Create a user label shown in the label list and message list
    pub fn create_label(&self, name: &str) -> Result<GmailLabel> {
        let url = format!("{}/users/me/labels", self.api_base);
        let body = CreateLabelRequest {
            name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
        };

        let response = self
            .agent
            .post(&url)
            .header("Authorization", &self.bearer()?)
            .send_json(&body)
            .context("Failed to send create label request")?;

        read_json(response, "create label")
    }

    /// Add and remove labels on up to 1000 messages in one call
    pub fn batch_modify_messages(
        &self,
        ids: &[&str],
        add_label_ids: &[&str],
        remove_label_ids: &[&str],
    ) -> Result<()> {
        let url = format!("{}/users/me/messages/batchModify", self.api_base);
        let body = BatchModifyRequest {
            ids,
            add_label_ids,
            remove_label_ids,
        };

        let mut response = self
            .agent
            .post(&url)
            .header("Authorization", &self.bearer()?)
            .send_json(&body)
            .context("Failed to send batch modify request")?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            bail!("Batch modify failed: HTTP {}: {}", status, api_error_message(&body));
        }
        Ok(())
    }
}

impl ListPages for GmailClient {
    fn list_page(&self, query: &str, page_token: Option<&str>) -> Result<ListMessagesResponse> {
        self.list_messages(query, Self::MAX_PAGE_SIZE, page_token)
    }
}

impl BatchSource for GmailClient {
    fn get_batch(&self, ids: &[MessageId]) -> Result<Vec<(MessageId, ItemOutcome)>, BatchError> {
        self.get_metadata_batch(ids)
    }
}

impl LabelApi for GmailClient {
    fn list_labels(&self) -> Result<Vec<GmailLabel>> {
        Ok(GmailClient::list_labels(self)?.labels.unwrap_or_default())
    }

    fn create_label(&self, name: &str) -> Result<GmailLabel> {
        GmailClient::create_label(self, name)
    }

    fn batch_modify(&self, ids: &[&str], add: &[&str], remove: &[&str]) -> Result<()> {
        self.batch_modify_messages(ids, add, remove)
    }
}

fn list_messages_url(base: &str, query: &str, max_results: usize, page_token: Option<&str>) -> String {
    let mut url = format!(
        "{}/users/me/messages?maxResults={}",
        base,
        max_results.clamp(1, GmailClient::MAX_PAGE_SIZE)
    );
    if !query.is_empty() {
        url.push_str(&format!("&q={}", urlencoding::encode(query)));
    }
    if let Some(token) = page_token {
        url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
    }
    url
}

fn header_str(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Read a JSON body, turning non-2xx statuses into errors
fn read_json<T: DeserializeOwned>(mut response: Response<Body>, what: &str) -> Result<T> {
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.body_mut().read_to_string().unwrap_or_default();
        bail!("Gmail {} failed: HTTP {}: {}", what, status, api_error_message(&body));
    }
    response
        .body_mut()
        .read_json()
        .with_context(|| format!("Failed to parse {what} response"))
}

/// Whether a whole-request failure is a throttling signal
fn is_rate_limited(status: u16, body: &str) -> bool {
    match status {
        429 => true,
        403 => serde_json::from_str::<ErrorResponse>(body).is_ok_and(|e| {
            matches!(
                e.error.reason(),
                Some("rateLimitExceeded" | "userRateLimitExceeded")
            )
        }),
        _ => false,
    }
}

/// Human-readable message from a Gmail error body
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| body.chars().take(200).collect())
}
