//! Mock backend for testing without a live provider.
//!
//! [`MockBackend`] plays back a script of outcomes in order, counting calls
//! and remembering the last job it saw, so pipeline behaviour (retries,
//! breaker trips, prompt shape) can be asserted deterministically.
//!
//! # Example
//!
//! ```
//! use codegen_pipeline::backend::MockBackend;
//! use codegen_pipeline::error::GenerationError;
//!
//! let mock = MockBackend::fixed("fn main() {}");
//! let flaky = MockBackend::scripted(vec![
//!     Err(GenerationError::Timeout),
//!     Ok("fn main() {}".to_string()),
//! ]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, GenerationJob, ProviderResponse};
use crate::error::GenerationError;

/// A test backend that returns scripted outcomes in order.
///
/// Cycles back to the beginning when the script has been consumed.
#[derive(Debug)]
pub struct MockBackend {
    script: Vec<Result<String, GenerationError>>,
    index: AtomicUsize,
    latency: Option<Duration>,
    last_job: Mutex<Option<GenerationJob>>,
}

impl MockBackend {
    /// Create a mock with the given outcome script.
    pub fn scripted(script: Vec<Result<String, GenerationError>>) -> Self {
        assert!(!script.is_empty(), "MockBackend requires at least one outcome");
        Self {
            script,
            index: AtomicUsize::new(0),
            latency: None,
            last_job: Mutex::new(None),
        }
    }

    /// Create a mock that always succeeds with the same text.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::scripted(vec![Ok(response.into())])
    }

    /// Create a mock that always fails with the same error.
    pub fn failing(error: GenerationError) -> Self {
        Self::scripted(vec![Err(error)])
    }

    /// Sleep this long before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of calls that reached the backend.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    /// The most recent job passed to [`Backend::complete`].
    pub fn last_job(&self) -> Option<GenerationJob> {
        self.last_job.lock().ok().and_then(|j| j.clone())
    }

    fn next_outcome(&self) -> Result<String, GenerationError> {
        let idx = self.index.fetch_add(1, Ordering::SeqCst) % self.script.len();
        self.script[idx].clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        job: &GenerationJob,
    ) -> Result<ProviderResponse, GenerationError> {
        if let Ok(mut last) = self.last_job.lock() {
            *last = Some(job.clone());
        }
        let outcome = self.next_outcome();
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        outcome.map(|text| ProviderResponse { text, status: 200 })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
