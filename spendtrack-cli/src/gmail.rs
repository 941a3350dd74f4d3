//! Gmail REST backend: search, fetch, and claim labeling over reqwest.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use spendtrack_core::BackendError;
use spendtrack_mail::{Candidate, MailboxBackend, MessagePage};

const BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

pub struct GmailBackend {
    client: reqwest::Client,
    token: String,
    claimed_label_id: String,
}

impl GmailBackend {
    /// Connects and resolves the claim label by name, creating it when the
    /// mailbox does not have it yet.
    pub async fn connect(token: String, claimed_label: &str) -> Result<Self, BackendError> {
        let client = reqwest::Client::new();
        let claimed_label_id = resolve_label_id(&client, &token, claimed_label).await?;
        Ok(Self {
            client,
            token,
            claimed_label_id,
        })
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, BackendError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("gmail request: {e}")))?;
        check_status(resp).await
    }
}

impl MailboxBackend for GmailBackend {
    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, BackendError> {
        #[derive(Deserialize)]
        struct MessageRef {
            id: String,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ListResponse {
            messages: Option<Vec<MessageRef>>,
            next_page_token: Option<String>,
        }

        let mut params = vec![("q", query)];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let url = format!("{BASE_URL}/messages");
        let resp = self.get(&url, &params).await?;
        let out: ListResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("decoding message list: {e}")))?;

        let ids: Vec<String> = out
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.id)
            .collect();
        debug!(count = ids.len(), more = out.next_page_token.is_some(), "search page");
        Ok(MessagePage {
            ids,
            next_page_token: out.next_page_token,
        })
    }

    async fn fetch(&self, id: &str) -> Result<Candidate, BackendError> {
        let url = format!("{BASE_URL}/messages/{id}");
        let resp = self.get(&url, &[("format", "full")]).await?;
        let message: Message = resp
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("decoding message {id}: {e}")))?;
        candidate_from_message(id, &message)
    }

    async fn claim(&self, id: &str) -> Result<(), BackendError> {
        #[derive(serde::Serialize)]
        #[serde(rename_all = "camelCase")]
        struct ModifyRequest<'a> {
            add_label_ids: [&'a str; 1],
        }

        let url = format!("{BASE_URL}/messages/{id}/modify");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&ModifyRequest {
                add_label_ids: [&self.claimed_label_id],
            })
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("gmail modify: {e}")))?;
        check_status(resp).await?;
        Ok(())
    }
}

async fn resolve_label_id(
    client: &reqwest::Client,
    token: &str,
    name: &str,
) -> Result<String, BackendError> {
    #[derive(Deserialize)]
    struct Label {
        id: String,
        name: String,
    }

    #[derive(Deserialize)]
    struct LabelList {
        labels: Option<Vec<Label>>,
    }

    let resp = client
        .get(format!("{BASE_URL}/labels"))
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| BackendError::Transient(format!("listing labels: {e}")))?;
    let resp = check_status(resp).await?;
    let list: LabelList = resp
        .json()
        .await
        .map_err(|e| BackendError::Fatal(format!("decoding label list: {e}")))?;

    if let Some(label) = list.labels.unwrap_or_default().into_iter().find(|l| l.name == name) {
        return Ok(label.id);
    }

    #[derive(serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    struct CreateLabel<'a> {
        name: &'a str,
        label_list_visibility: &'a str,
        message_list_visibility: &'a str,
    }

    info!(label = %name, "claim label missing, creating it");
    let resp = client
        .post(format!("{BASE_URL}/labels"))
        .bearer_auth(token)
        .json(&CreateLabel {
            name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
        })
        .send()
        .await
        .map_err(|e| BackendError::Transient(format!("creating label: {e}")))?;
    let resp = check_status(resp).await?;
    let created: Label = resp
        .json()
        .await
        .map_err(|e| BackendError::Fatal(format!("decoding created label: {e}")))?;
    Ok(created.id)
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(BackendError::Transient(format!("gmail {status}: {body}")))
    } else {
        Err(BackendError::Fatal(format!("gmail {status}: {body}")))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    payload: MessagePart,
    /// Epoch milliseconds, as a string.
    internal_date: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct PartBody {
    data: Option<String>,
}

fn candidate_from_message(id: &str, message: &Message) -> Result<Candidate, BackendError> {
    let sender = message
        .payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("From"))
        .map(|h| h.value.clone())
        .unwrap_or_default();

    // Multipart messages usually carry both; the HTML part keeps the
    // transaction details that some senders omit from the text part.
    let (data, is_html) = find_body(&message.payload, "text/html")
        .map(|d| (d, true))
        .or_else(|| find_body(&message.payload, "text/plain").map(|d| (d, false)))
        .ok_or_else(|| BackendError::Fatal(format!("message {id} has no readable body")))?;

    let body = decode_body(data)
        .map_err(|e| BackendError::Fatal(format!("message {id} body: {e}")))?;

    let millis: i64 = message
        .internal_date
        .parse()
        .map_err(|_| BackendError::Fatal(format!("message {id} has bad internalDate")))?;
    let received_at = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| BackendError::Fatal(format!("message {id} has bad internalDate")))?;

    Ok(Candidate {
        id: id.to_string(),
        sender,
        body,
        body_is_html: is_html,
        received_at,
    })
}

/// Depth-first search for the first part of the wanted MIME type that
/// actually carries data. Single-part messages keep the body at the root.
fn find_body<'a>(part: &'a MessagePart, mime_type: &str) -> Option<&'a str> {
    if part.mime_type == mime_type {
        if let Some(data) = part.body.data.as_deref() {
            return Some(data);
        }
    }
    part.parts.iter().find_map(|p| find_body(p, mime_type))
}

fn decode_body(data: &str) -> Result<String, String> {
    // Gmail pads inconsistently; strip before decoding with the no-pad engine.
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| format!("base64: {e}"))?;
    String::from_utf8(bytes).map_err(|e| format!("utf8: {e}"))
}
