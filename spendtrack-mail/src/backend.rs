//! Mailbox backend interface and message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use spendtrack_core::BackendError;

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    pub ids: Vec<String>,
    /// Present when the backend has more results.
    pub next_page_token: Option<String>,
}

/// A fetched source message, not yet known to contain a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub id: String,
    /// Raw From header, e.g. `Wise <noreply@wise.com>`.
    pub sender: String,
    /// HTML body when the message has one, otherwise the plain-text part.
    pub body: String,
    /// Whether `body` is HTML and needs stripping.
    pub body_is_html: bool,
    /// Receipt timestamp.
    pub received_at: DateTime<Utc>,
}

/// The mailbox service boundary: search with pagination, body retrieval,
/// and idempotent claim labeling. Implementations own transport and auth.
#[allow(async_fn_in_trait)]
pub trait MailboxBackend {
    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, BackendError>;

    async fn fetch(&self, id: &str) -> Result<Candidate, BackendError>;

    /// Mark the message as claimed. Must be idempotent.
    async fn claim(&self, id: &str) -> Result<(), BackendError>;
}
