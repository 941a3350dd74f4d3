//! Gemini generateContent backend.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use spendtrack_ai::ModelBackend;
use spendtrack_core::BackendError;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

impl ModelBackend for GeminiBackend {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        #[derive(Serialize)]
        struct Part<'a> {
            text: &'a str,
        }

        #[derive(Serialize)]
        struct Content<'a> {
            parts: Vec<Part<'a>>,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct GenerationConfig {
            temperature: f32,
            max_output_tokens: u32,
            top_p: f32,
            top_k: u32,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Request<'a> {
            contents: Vec<Content<'a>>,
            generation_config: GenerationConfig,
        }

        #[derive(Deserialize)]
        struct Response {
            candidates: Option<Vec<ResponseCandidate>>,
        }

        #[derive(Deserialize)]
        struct ResponseCandidate {
            content: Option<ResponseContent>,
        }

        #[derive(Deserialize)]
        struct ResponseContent {
            parts: Option<Vec<ResponsePart>>,
        }

        #[derive(Deserialize)]
        struct ResponsePart {
            text: Option<String>,
        }

        let body = Request {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            // Near-greedy decoding; the prompt demands strict JSON and we
            // want the same record to resolve the same way every run.
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 8192,
                top_p: 1.0,
                top_k: 40,
            },
        };

        let url = format!("{BASE_URL}/{}:generateContent", self.model);
        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("gemini request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(BackendError::Transient(format!("gemini {status}: {text}")))
            } else {
                Err(BackendError::Fatal(format!("gemini {status}: {text}")))
            };
        }

        let out: Response = resp
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("decoding gemini response: {e}")))?;

        let mut text = String::new();
        for candidate in out.candidates.unwrap_or_default() {
            let parts = candidate.content.and_then(|c| c.parts).unwrap_or_default();
            for part in parts {
                if let Some(t) = part.text {
                    text.push_str(&t);
                }
            }
        }
        if text.is_empty() {
            return Err(BackendError::Fatal("gemini returned no text parts".to_string()));
        }
        debug!(model = %self.model, chars = text.len(), "gemini response received");
        Ok(text)
    }
}
