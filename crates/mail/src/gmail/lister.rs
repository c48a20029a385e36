//! Lazy, paginated listing of message IDs

use anyhow::Result;
use log::{debug, info};
use std::collections::VecDeque;

use super::api::ListMessagesResponse;
use crate::models::MessageId;

/// One page of the message listing endpoint
pub trait ListPages {
    /// Fetch the page identified by `page_token` (first page when `None`)
    fn list_page(&self, query: &str, page_token: Option<&str>) -> Result<ListMessagesResponse>;
}

/// Listing stopped before the service reported the last page
///
/// Never retried: an incomplete listing would understate the work to do.
#[derive(Debug, thiserror::Error)]
#[error("Message listing aborted after {pages} pages ({ids_seen} IDs): {source}")]
pub struct ListingError {
    /// Pages successfully fetched before the failure
    pub pages: usize,
    /// IDs yielded before the failure
    pub ids_seen: usize,
    /// Token of the page that failed (`None` for the first page)
    pub page_token: Option<String>,
    #[source]
    pub source: anyhow::Error,
}

/// Iterator over every message ID matching a search query
///
/// Pages are requested on demand. A failed page yields one `Err` and ends the
/// iteration. To list again, build a new lister.
pub struct IdLister<'a, S: ListPages + ?Sized> {
    source: &'a S,
    query: String,
    buffer: VecDeque<MessageId>,
    page_token: Option<String>,
    pages: usize,
    ids_seen: usize,
    done: bool,
}

impl<'a, S: ListPages + ?Sized> IdLister<'a, S> {
    pub fn new(source: &'a S, query: impl Into<String>) -> Self {
        Self {
            source,
            query: query.into(),
            buffer: VecDeque::new(),
            page_token: None,
            pages: 0,
            ids_seen: 0,
            done: false,
        }
    }

    /// Pages fetched so far
    pub fn pages(&self) -> usize {
        self.pages
    }
}

impl<S: ListPages + ?Sized> Iterator for IdLister<'_, S> {
    type Item = Result<MessageId, ListingError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.buffer.pop_front() {
                self.ids_seen += 1;
                return Some(Ok(id));
            }
            if self.done {
                return None;
            }

            match self.source.list_page(&self.query, self.page_token.as_deref()) {
                Ok(page) => {
                    self.pages += 1;
                    let refs = page.messages.unwrap_or_default();
                    debug!(
                        "[LIST] Page {}: {} IDs (estimate {:?})",
                        self.pages,
                        refs.len(),
                        page.result_size_estimate
                    );
                    self.buffer.extend(refs.into_iter().map(|r| MessageId::new(r.id)));

                    match page.next_page_token {
                        Some(token) if !token.is_empty() => self.page_token = Some(token),
                        _ => self.done = true,
                    }
                }
                Err(source) => {
                    self.done = true;
                    return Some(Err(ListingError {
                        pages: self.pages,
                        ids_seen: self.ids_seen,
                        page_token: self.page_token.take(),
                        source,
                    }));
                }
            }
        }
    }
}

/// List every message ID matching `query`
pub fn list_all_ids<S: ListPages + ?Sized>(
    source: &S,
    query: &str,
) -> Result<Vec<MessageId>, ListingError> {
    let mut lister = IdLister::new(source, query);
    let ids = lister.by_ref().collect::<Result<Vec<_>, _>>()?;
    info!("[LIST] Listed {} message IDs in {} pages", ids.len(), lister.pages());
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::MessageRef;
    use anyhow::anyhow;
    use std::sync::Mutex;

    /// Serves pre-scripted pages and records the tokens it was asked for
    struct ScriptedPages {
        pages: Mutex<VecDeque<Result<ListMessagesResponse>>>,
        requested: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ScriptedPages {
        fn new(pages: Vec<Result<ListMessagesResponse>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl ListPages for ScriptedPages {
        fn list_page(&self, query: &str, page_token: Option<&str>) -> Result<ListMessagesResponse> {
            self.requested
                .lock()
                .unwrap()
                .push((query.to_string(), page_token.map(str::to_string)));
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no more scripted pages")))
        }
    }

    fn page(ids: &[&str], next: Option<&str>) -> Result<ListMessagesResponse> {
        Ok(ListMessagesResponse {
            messages: Some(
                ids.iter()
                    .map(|id| MessageRef {
                        id: id.to_string(),
                        thread_id: None,
                    })
                    .collect(),
            ),
            next_page_token: next.map(str::to_string),
            result_size_estimate: None,
        })
    }

    #[test]
    fn test_follows_page_tokens_until_exhausted() {
        let source = ScriptedPages::new(vec![
            page(&["a", "b"], Some("p2")),
            page(&["c"], Some("p3")),
            page(&["d"], None),
        ]);

        let ids = list_all_ids(&source, "in:inbox").unwrap();
        let ids: Vec<_> = ids.iter().map(|m| m.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        let requested = source.requested.lock().unwrap();
        assert_eq!(requested.len(), 3);
        assert_eq!(requested[0], ("in:inbox".to_string(), None));
        assert_eq!(requested[1].1.as_deref(), Some("p2"));
        assert_eq!(requested[2].1.as_deref(), Some("p3"));
    }

    #[test]
    fn test_empty_page_with_token_is_followed() {
        let source = ScriptedPages::new(vec![
            Ok(ListMessagesResponse {
                messages: None,
                next_page_token: Some("p2".to_string()),
                result_size_estimate: Some(0),
            }),
            page(&["a"], None),
        ]);

        let ids = list_all_ids(&source, "").unwrap();
        assert_eq!(ids, vec![MessageId::new("a")]);
    }

    #[test]
    fn test_empty_mailbox() {
        let source = ScriptedPages::new(vec![Ok(ListMessagesResponse::default())]);
        assert!(list_all_ids(&source, "").unwrap().is_empty());
    }

    #[test]
    fn test_transport_error_aborts_with_context() {
        let source = ScriptedPages::new(vec![
            page(&["a", "b"], Some("p2")),
            Err(anyhow!("connection reset")),
            page(&["never"], None),
        ]);

        let err = list_all_ids(&source, "").unwrap_err();
        assert_eq!(err.pages, 1);
        assert_eq!(err.ids_seen, 2);
        assert_eq!(err.page_token.as_deref(), Some("p2"));
        assert!(err.to_string().contains("connection reset"));
        // Not retried
        assert_eq!(source.requested.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_iterator_is_lazy_and_fused_after_error() {
        let source = ScriptedPages::new(vec![page(&["a"], Some("p2")), Err(anyhow!("boom"))]);
        let mut lister = IdLister::new(&source, "");

        assert_eq!(source.requested.lock().unwrap().len(), 0);
        assert_eq!(lister.next().unwrap().unwrap().as_str(), "a");
        assert_eq!(source.requested.lock().unwrap().len(), 1);
        assert!(lister.next().unwrap().is_err());
        assert!(lister.next().is_none());
        assert!(lister.next().is_none());
        assert_eq!(source.requested.lock().unwrap().len(), 2);
    }
}
