//! Provider trait and normalized job/response types.
//!
//! The [`Backend`] trait abstracts over generation providers, translating a
//! [`GenerationJob`] into a provider-specific HTTP call and classifying
//! every failure into a [`GenerationError`]. Retry and circuit breaking live
//! one layer up, in [`ResilientClient`](crate::resilience::ResilientClient).
//!
//! ```text
//! Pipeline ──► GenerationJob ──► ResilientClient ──► Backend::complete() ──► ProviderResponse
//!                                                          │
//!                                               ┌──────────┴──────────┐
//!                                         OpenAiBackend          MockBackend
//!                                   /v1/chat/completions      scripted outcomes
//! ```

pub mod backoff;
pub mod mock;
pub mod openai;

pub use backoff::{BackoffConfig, JitterStrategy};
pub use mock::MockBackend;
pub use openai::OpenAiBackend;

use crate::error::GenerationError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

/// A single generation request, provider-agnostic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationJob {
    /// Model identifier (e.g. `"llama3-8b-8192"`).
    pub model: String,
    /// Fully assembled instruction text.
    pub prompt: String,
    /// Token budget, never above the configured provider ceiling.
    pub max_tokens: u32,
    pub temperature: f64,
}

impl GenerationJob {
    /// Build a job, clamping `max_tokens` to `ceiling`.
    pub fn new(
        model: impl Into<String>,
        prompt: impl Into<String>,
        max_tokens: u32,
        temperature: f64,
        ceiling: u32,
    ) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: max_tokens.min(ceiling),
            temperature,
        }
    }
}

/// A successful provider answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    /// Generated text, trimmed.
    pub text: String,
    /// HTTP status code (for diagnostics/logging).
    pub status: u16,
}

/// Abstraction over generation providers.
///
/// Implementors must never fold a failure into a successful
/// [`ProviderResponse`]; every non-success outcome is a [`GenerationError`].
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute one attempt. No retries happen here.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        job: &GenerationJob,
    ) -> Result<ProviderResponse, GenerationError>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_clamps_to_ceiling() {
        let job = GenerationJob::new("m", "p", 4000, 0.5, 2048);
        assert_eq!(job.max_tokens, 2048);

        let job = GenerationJob::new("m", "p", 1500, 0.5, 2048);
        assert_eq!(job.max_tokens, 1500);
    }
}
