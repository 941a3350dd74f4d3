//! Candidate selection: provider query construction and full pagination.

use tracing::{debug, info, warn};

use spendtrack_core::{BackendError, PipelineConfig, RetryPolicy};

use crate::backend::MailboxBackend;

/// Selects candidate messages for one run.
///
/// Builds the provider query with the recency window and the claimed-label
/// exclusion, then walks every result page the backend reports. Transient
/// search failures are retried per the policy; anything else propagates and
/// aborts the run.
pub struct MessageFilter<'a> {
    config: &'a PipelineConfig,
    policy: RetryPolicy,
}

impl<'a> MessageFilter<'a> {
    pub fn new(config: &'a PipelineConfig, policy: RetryPolicy) -> Self {
        Self { config, policy }
    }

    /// Mailbox query selecting unclaimed provider mail inside the window.
    ///
    /// Shape: `((from:a ("p" OR "q")) OR (from:b "r")) newer_than:7d -label:x`
    pub fn query(&self) -> String {
        let provider_terms: Vec<String> = self
            .config
            .providers
            .iter()
            .map(|rule| {
                let phrases: Vec<String> =
                    rule.phrases.iter().map(|p| format!("\"{p}\"")).collect();
                match phrases.len() {
                    0 => format!("(from:{})", rule.sender),
                    1 => format!("(from:{} {})", rule.sender, phrases[0]),
                    _ => format!("(from:{} ({}))", rule.sender, phrases.join(" OR ")),
                }
            })
            .collect();

        format!(
            "({}) newer_than:{}d -label:{}",
            provider_terms.join(" OR "),
            self.config.days_back,
            self.config.claimed_label
        )
    }

    /// All matching message ids, across every result page, in discovery
    /// order.
    pub async fn candidate_ids<M: MailboxBackend>(
        &self,
        mailbox: &M,
    ) -> Result<Vec<String>, BackendError> {
        let query = self.query();
        debug!(%query, "searching for transaction mail");

        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .search_page(mailbox, &query, page_token.as_deref())
                .await?;
            ids.extend(page.ids);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(count = ids.len(), "found candidate messages");
        Ok(ids)
    }

    async fn search_page<M: MailboxBackend>(
        &self,
        mailbox: &M,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<crate::backend::MessagePage, BackendError> {
        let mut attempt = 1;
        loop {
            match mailbox.search(query, page_token).await {
                Ok(page) => return Ok(page),
                Err(err) if self.policy.should_retry(&err, attempt) => {
                    warn!(%err, attempt, "mailbox search failed, retrying");
                    tokio::time::sleep(self.policy.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Candidate, MessagePage};
    use std::cell::RefCell;
    use std::time::Duration;

    struct PagedMailbox {
        pages: Vec<MessagePage>,
        search_failures: RefCell<u32>,
        searches: RefCell<Vec<Option<String>>>,
    }

    impl PagedMailbox {
        fn new(pages: Vec<MessagePage>) -> Self {
            Self {
                pages,
                search_failures: RefCell::new(0),
                searches: RefCell::new(Vec::new()),
            }
        }
    }

    impl MailboxBackend for PagedMailbox {
        async fn search(
            &self,
            _query: &str,
            page_token: Option<&str>,
        ) -> Result<MessagePage, BackendError> {
            if *self.search_failures.borrow() > 0 {
                *self.search_failures.borrow_mut() -= 1;
                return Err(BackendError::Transient("search 503".into()));
            }
            self.searches
                .borrow_mut()
                .push(page_token.map(str::to_string));
            let index = match page_token {
                None => 0,
                Some(t) => t.parse::<usize>().unwrap(),
            };
            Ok(self.pages[index].clone())
        }

        async fn fetch(&self, _id: &str) -> Result<Candidate, BackendError> {
            unimplemented!("not used by filter tests")
        }

        async fn claim(&self, _id: &str) -> Result<(), BackendError> {
            unimplemented!("not used by filter tests")
        }
    }

    fn page(ids: &[&str], next: Option<&str>) -> MessagePage {
        MessagePage {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            next_page_token: next.map(str::to_string),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_query_includes_providers_window_and_exclusion() {
        let config = PipelineConfig::default();
        let filter = MessageFilter::new(&config, fast_policy());
        let query = filter.query();
        assert_eq!(
            query,
            "((from:noreply@wise.com (\"You spent\" OR \"is now in\")) \
             OR (from:service@paypal.de \"Von Ihnen gezahlt\")) \
             newer_than:7d -label:spendtrack/processed"
        );
    }

    #[tokio::test]
    async fn test_collects_all_three_pages() {
        let config = PipelineConfig::default();
        let mailbox = PagedMailbox::new(vec![
            page(&["m1", "m2"], Some("1")),
            page(&["m3"], Some("2")),
            page(&["m4", "m5"], None),
        ]);
        let filter = MessageFilter::new(&config, fast_policy());
        let ids = filter.candidate_ids(&mailbox).await.unwrap();
        assert_eq!(ids, vec!["m1", "m2", "m3", "m4", "m5"]);
        assert_eq!(
            *mailbox.searches.borrow(),
            vec![None, Some("1".to_string()), Some("2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_transient_search_failure_is_retried() {
        let config = PipelineConfig::default();
        let mailbox = PagedMailbox::new(vec![page(&["m1"], None)]);
        *mailbox.search_failures.borrow_mut() = 2;
        let filter = MessageFilter::new(&config, fast_policy());
        let ids = filter.candidate_ids(&mailbox).await.unwrap();
        assert_eq!(ids, vec!["m1"]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_propagate() {
        let config = PipelineConfig::default();
        let mailbox = PagedMailbox::new(vec![page(&["m1"], None)]);
        *mailbox.search_failures.borrow_mut() = 5;
        let filter = MessageFilter::new(&config, fast_policy());
        let err = filter.candidate_ids(&mailbox).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fatal_search_failure_propagates_immediately() {
        struct AuthFailing;
        impl MailboxBackend for AuthFailing {
            async fn search(
                &self,
                _query: &str,
                _page_token: Option<&str>,
            ) -> Result<MessagePage, BackendError> {
                Err(BackendError::Fatal("401 unauthorized".into()))
            }
            async fn fetch(&self, _id: &str) -> Result<Candidate, BackendError> {
                unreachable!()
            }
            async fn claim(&self, _id: &str) -> Result<(), BackendError> {
                unreachable!()
            }
        }

        let config = PipelineConfig::default();
        let filter = MessageFilter::new(&config, fast_policy());
        let err = filter.candidate_ids(&AuthFailing).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
