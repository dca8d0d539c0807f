//! Backend for OpenAI-compatible chat completion APIs.
//!
//! [`OpenAiBackend`] covers Groq (the default provider), OpenAI, Together AI,
//! Mistral, Fireworks, vLLM and llama.cpp server.
//!
//! Endpoint: `/v1/chat/completions`, non-streaming.

use super::{Backend, GenerationJob, ProviderResponse};
use crate::error::GenerationError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Backend for any OpenAI-compatible API.
///
/// # Example
///
/// ```
/// use codegen_pipeline::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new().with_api_key("gsk_...");
/// assert!(backend.has_api_key());
/// ```
#[derive(Clone)]
pub struct OpenAiBackend {
    /// Sent as `Authorization: Bearer {key}` when set.
    pub(crate) api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field(
                "api_key",
                &self.api_key.as_ref().map(|k| {
                    if k.chars().count() > 6 {
                        format!("{}***", k.chars().take(6).collect::<String>())
                    } else {
                        "***".to_string()
                    }
                }),
            )
            .finish()
    }
}

impl OpenAiBackend {
    pub fn new() -> Self {
        Self { api_key: None }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Build the request body for `/v1/chat/completions`.
    ///
    /// The whole instruction travels as a single user message.
    fn build_body(job: &GenerationJob) -> Value {
        json!({
            "model": job.model,
            "messages": [{"role": "user", "content": job.prompt}],
            "max_tokens": job.max_tokens,
            "temperature": job.temperature,
        })
    }

    /// Parse a `Retry-After` header value as seconds.
    fn parse_retry_after(value: &str) -> Option<Duration> {
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    }

    fn build_http_request(&self, client: &Client, url: &str, body: &Value) -> reqwest::RequestBuilder {
        let mut req = client.post(url).json(body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        req
    }

    /// Map a transport-level reqwest failure.
    fn classify_transport(err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Network(err.to_string())
        }
    }

    /// Map a non-success HTTP status.
    fn classify_status(status: u16, retry_after: Option<Duration>, body: String) -> GenerationError {
        if status == 429 {
            GenerationError::RateLimited { retry_after }
        } else {
            GenerationError::Provider {
                status,
                message: body,
            }
        }
    }

    fn extract_text(json_resp: &Value) -> Option<String> {
        json_resp
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
    }
}

impl Default for OpenAiBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        job: &GenerationJob,
    ) -> Result<ProviderResponse, GenerationError> {
        let base = base_url.trim_end_matches('/');
        let url = format!("{}/v1/chat/completions", base);
        let body = Self::build_body(job);

        let resp = self
            .build_http_request(client, &url, &body)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, retry_after, text));
        }

        let json_resp: Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::Provider {
                    status,
                    message: format!("unreadable response body: {}", e),
                }
            }
        })?;

        let text = Self::extract_text(&json_resp).ok_or_else(|| GenerationError::Provider {
            status,
            message: "response has no choices[0].message.content".to_string(),
        })?;

        Ok(ProviderResponse { text, status })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
