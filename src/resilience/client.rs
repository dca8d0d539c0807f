//! Provider adapter with retry, deadline and circuit breaking.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use crate::backend::{Backend, BackoffConfig, GenerationJob, OpenAiBackend, ProviderResponse};
use crate::error::{ConfigError, GenerationError};
use crate::events::{self, Event, EventHandler};

/// Calls the generation provider under the retry, deadline and breaker policy.
///
/// Cheap to clone; the breaker is shared between clones.
#[derive(Clone)]
pub struct ResilientClient {
    client: Client,
    base_url: String,
    backend: Arc<dyn Backend>,
    backoff: BackoffConfig,
    breaker: Arc<CircuitBreaker>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("backoff", &self.backoff)
            .field("breaker", &self.breaker)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

impl ResilientClient {
    pub fn builder(base_url: impl Into<String>) -> ResilientClientBuilder {
        ResilientClientBuilder {
            client: None,
            base_url: base_url.into(),
            backend: None,
            backoff: None,
            breaker: None,
            event_handler: None,
            timeout: None,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Run `job` against the provider.
    ///
    /// At most `backoff.max_attempts` attempts are made, all inside the single
    /// `deadline`. Each attempt is admitted by the circuit breaker and its
    /// outcome recorded there. Cancellation stops the sequence immediately
    /// and records nothing for the abandoned attempt.
    pub async fn invoke(
        &self,
        job: &GenerationJob,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, GenerationError> {
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut last_error: Option<GenerationError> = None;

        for attempt in 0..max_attempts {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }

            if attempt > 0 {
                let hint = last_error.as_ref().and_then(GenerationError::retry_after);
                let delay = self.backoff.delay_with_hint(attempt - 1, hint);
                if Instant::now() + delay >= deadline {
                    debug!(attempt, "retry delay would overrun the deadline");
                    break;
                }

                let reason = last_error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                warn!(attempt, delay_ms = delay.as_millis() as u64, %reason, "retrying provider call");
                events::emit(
                    &self.event_handler,
                    Event::TransportRetry {
                        attempt,
                        delay,
                        reason,
                    },
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if Instant::now() >= deadline {
                break;
            }

            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(open) => {
                    debug!(attempt = attempt + 1, "circuit breaker rejected attempt");
                    return Err(last_error.unwrap_or(open));
                }
            };

            debug!(attempt = attempt + 1, backend = self.backend.name(), model = %job.model, "provider attempt");
            events::emit(&self.event_handler, Event::AttemptStart { attempt: attempt + 1 });

            let call = self.backend.complete(&self.client, &self.base_url, job);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.breaker.on_abandon(permit);
                    return Err(GenerationError::Cancelled);
                }
                result = tokio::time::timeout_at(deadline, call) => {
                    result.unwrap_or(Err(GenerationError::Timeout))
                }
            };

            match outcome {
                Ok(response) => {
                    self.breaker.on_success(permit);
                    return Ok(response);
                }
                Err(e) => {
                    self.breaker.on_failure(permit);
                    if !e.is_retryable() {
                        debug!(error = %e, "non-retryable provider failure");
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(GenerationError::Timeout))
    }
}

/// Builder for [`ResilientClient`].
pub struct ResilientClientBuilder {
    client: Option<Client>,
    base_url: String,
    backend: Option<Arc<dyn Backend>>,
    backoff: Option<BackoffConfig>,
    breaker: Option<Arc<CircuitBreaker>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    timeout: Option<Duration>,
}

impl ResilientClientBuilder {
    /// Set the HTTP client. If not set, one is built with the configured timeout.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the provider backend. Default: [`OpenAiBackend`] without a key.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use the OpenAI-compatible backend with API key authentication.
    pub fn openai_with_key(mut self, api_key: impl Into<String>) -> Self {
        self.backend = Some(Arc::new(OpenAiBackend::new().with_api_key(api_key)));
        self
    }

    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = Some(config);
        self
    }

    /// Share an existing breaker. Default: a fresh breaker with default settings.
    pub fn breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn event_handler(mut self, handler: Option<Arc<dyn EventHandler>>) -> Self {
        self.event_handler = handler;
        self
    }

    /// Per-attempt HTTP timeout. Default: 60 seconds.
    ///
    /// Ignored when a custom `Client` is supplied.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<ResilientClient, ConfigError> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .timeout(self.timeout.unwrap_or(Duration::from_secs(60)))
                .build()
                .map_err(|e| ConfigError::InvalidSetting {
                    name: "http_client",
                    reason: e.to_string(),
                })?,
        };
        Ok(ResilientClient {
            client,
            base_url: normalize_base_url(&self.base_url),
            backend: self
                .backend
                .unwrap_or_else(|| Arc::new(OpenAiBackend::new())),
            backoff: self.backoff.unwrap_or_default(),
            breaker: self
                .breaker
                .unwrap_or_else(|| Arc::new(CircuitBreaker::new(Default::default()))),
            event_handler: self.event_handler,
        })
    }
}

/// Strip known provider path suffixes from a base URL so the backend can
/// append its own path.
/// e.g., "https://api.groq.com/openai/v1" -> "https://api.groq.com/openai"
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    for suffix in &["/v1/chat/completions", "/v1/chat", "/v1"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{JitterStrategy, MockBackend};
    use crate::events::RecordingHandler;
    use crate::resilience::{BreakerState, CircuitBreakerConfig};

    fn job() -> GenerationJob {
        GenerationJob::new("llama3-8b-8192", "Instruction: reverse a list", 1500, 0.5, 4000)
    }

    fn backoff(max_attempts: u32) -> BackoffConfig {
        BackoffConfig::standard()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::from_secs(1))
            .with_jitter(JitterStrategy::None)
    }

    fn client_with(
        mock: Arc<MockBackend>,
        max_attempts: u32,
        breaker: CircuitBreakerConfig,
    ) -> ResilientClient {
        ResilientClient::builder("http://unused")
            .backend(mock)
            .backoff(backoff(max_attempts))
            .breaker(Arc::new(CircuitBreaker::new(breaker)))
            .build()
            .expect("client")
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(120)
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://api.groq.com/openai/v1"),
            "https://api.groq.com/openai"
        );
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1/chat/completions"),
            "https://api.openai.com"
        );
        assert_eq!(normalize_base_url("http://localhost:8080/"), "http://localhost:8080");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_makes_one_call() {
        let mock = Arc::new(MockBackend::fixed("reversed"));
        let client = client_with(mock.clone(), 3, CircuitBreakerConfig::default());

        let resp = client
            .invoke(&job(), far_deadline(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.text, "reversed");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_attempts_and_count_each_attempt() {
        let mock = Arc::new(MockBackend::failing(GenerationError::Timeout));
        let client = client_with(mock.clone(), 3, CircuitBreakerConfig::default());

        let err = client
            .invoke(&job(), far_deadline(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::Timeout);
        assert_eq!(mock.calls(), 3);
        assert_eq!(client.breaker().consecutive_failures(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let mock = Arc::new(MockBackend::failing(GenerationError::Provider {
            status: 400,
            message: "bad".into(),
        }));
        let client = client_with(mock.clone(), 5, CircuitBreakerConfig::default());

        let err = client
            .invoke(&job(), far_deadline(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Provider { status: 400, .. }));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let mock = Arc::new(MockBackend::scripted(vec![
            Err(GenerationError::Network("reset".into())),
            Err(GenerationError::Provider {
                status: 502,
                message: "bad gateway".into(),
            }),
            Ok("done".into()),
        ]));
        let recorder = Arc::new(RecordingHandler::new());
        let client = ResilientClient::builder("http://unused")
            .backend(mock.clone())
            .backoff(backoff(3))
            .event_handler(Some(recorder.clone()))
            .build()
            .unwrap();

        let resp = client
            .invoke(&job(), far_deadline(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.text, "done");
        assert_eq!(mock.calls(), 3);
        assert_eq!(client.breaker().consecutive_failures(), 0);

        let retries: Vec<Duration> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::TransportRetry { delay, .. } => Some(delay),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_honoured() {
        let mock = Arc::new(MockBackend::scripted(vec![
            Err(GenerationError::RateLimited {
                retry_after: Some(Duration::from_secs(7)),
            }),
            Ok("ok".into()),
        ]));
        let client = client_with(mock.clone(), 2, CircuitBreakerConfig::default());

        let start = Instant::now();
        client
            .invoke(&job(), far_deadline(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(Instant::now() - start >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_deadline_bounds_the_sequence() {
        let mock = Arc::new(
            MockBackend::failing(GenerationError::Network("down".into()))
                .with_latency(Duration::from_secs(10)),
        );
        let client = client_with(mock.clone(), 5, CircuitBreakerConfig::default());

        let start = Instant::now();
        let err = client
            .invoke(
                &job(),
                start + Duration::from_secs(15),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        // attempt 1 fails at t=10, attempt 2 starts at t=11 and hits the deadline at t=15
        assert_eq!(err, GenerationError::Timeout);
        assert_eq!(mock.calls(), 2);
        assert!(Instant::now() - start <= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_skipped_when_delay_overruns_deadline() {
        let mock = Arc::new(MockBackend::failing(GenerationError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        }));
        let client = client_with(mock.clone(), 3, CircuitBreakerConfig::default());

        let err = client
            .invoke(
                &job(),
                Instant::now() + Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::RateLimited { .. }));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_and_rejects_without_calling_provider() {
        let mock = Arc::new(MockBackend::scripted(vec![
            Err(GenerationError::Network("down".into())),
            Err(GenerationError::Network("down".into())),
            Ok("recovered".into()),
        ]));
        let client = client_with(
            mock.clone(),
            1,
            CircuitBreakerConfig::new()
                .with_failure_threshold(2)
                .with_cool_down(Duration::from_secs(30)),
        );
        let cancel = CancellationToken::new();

        assert!(client.invoke(&job(), far_deadline(), &cancel).await.is_err());
        assert_eq!(client.breaker().state(), BreakerState::Closed);
        assert!(client.invoke(&job(), far_deadline(), &cancel).await.is_err());
        assert_eq!(client.breaker().state(), BreakerState::Open);

        let err = client.invoke(&job(), far_deadline(), &cancel).await.unwrap_err();
        assert!(matches!(err, GenerationError::CircuitOpen { .. }));
        assert_eq!(mock.calls(), 2, "open breaker must not reach the provider");

        tokio::time::advance(Duration::from_secs(30)).await;
        let resp = client.invoke(&job(), far_deadline(), &cancel).await.unwrap();
        assert_eq!(resp.text, "recovered");
        assert_eq!(client.breaker().state(), BreakerState::Closed);
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opening_mid_sequence_surfaces_last_error() {
        let mock = Arc::new(MockBackend::failing(GenerationError::Network("down".into())));
        let client = client_with(
            mock.clone(),
            5,
            CircuitBreakerConfig::new().with_failure_threshold(2),
        );

        let err = client
            .invoke(&job(), far_deadline(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Network(_)));
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_without_recording() {
        let mock = Arc::new(MockBackend::fixed("late").with_latency(Duration::from_secs(10)));
        let client = client_with(mock.clone(), 3, CircuitBreakerConfig::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = client.invoke(&job(), far_deadline(), &cancel).await.unwrap_err();
        assert_eq!(err, GenerationError::Cancelled);
        assert_eq!(mock.calls(), 1);
        assert_eq!(client.breaker().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff_sleep() {
        let mock = Arc::new(MockBackend::failing(GenerationError::Network("reset".into())));
        let client = client_with(mock.clone(), 3, CircuitBreakerConfig::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = client.invoke(&job(), far_deadline(), &cancel).await.unwrap_err();
        assert_eq!(err, GenerationError::Cancelled);
        assert_eq!(mock.calls(), 1);
        assert_eq!(client.breaker().consecutive_failures(), 1);
        // returned mid-sleep, well before the 1s backoff elapsed
        assert!(Instant::now() - start < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_never_calls() {
        let mock = Arc::new(MockBackend::fixed("x"));
        let client = client_with(mock.clone(), 3, CircuitBreakerConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.invoke(&job(), far_deadline(), &cancel).await.unwrap_err();
        assert_eq!(err, GenerationError::Cancelled);
        assert_eq!(mock.calls(), 0);
    }
}
