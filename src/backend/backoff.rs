//! Retry budget with exponential backoff and jitter.
//!
//! [`BackoffConfig`] controls how many attempts the
//! [`ResilientClient`](crate::resilience::ResilientClient) makes and how long
//! it sleeps between them. For tests or local mocks, use
//! [`BackoffConfig::none()`]. For Groq and other hosted APIs, use
//! [`BackoffConfig::standard()`] or [`BackoffConfig::interactive()`].

use std::time::Duration;

/// Configuration for provider retry with exponential backoff and jitter.
///
/// Which failures are retried is decided by
/// [`GenerationError::is_retryable`](crate::error::GenerationError::is_retryable);
/// this struct only decides how often and how far apart.
///
/// # Example
///
/// ```
/// use codegen_pipeline::backend::BackoffConfig;
///
/// let none = BackoffConfig::none();
/// assert_eq!(none.max_attempts, 1);
///
/// let standard = BackoffConfig::standard();
/// assert_eq!(standard.max_attempts, 3);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Total attempts, including the first one. Default: 3.
    pub max_attempts: u32,

    /// Delay before the first retry. Default: 500ms.
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each retry. Default: 2.0.
    /// Delay grows: initial, initial * multiplier, initial * multiplier^2, ...
    pub multiplier: f64,

    /// Upper bound for a single delay. Default: 8 seconds.
    pub max_delay: Duration,

    /// Jitter strategy. Default: Full.
    pub jitter: JitterStrategy,

    /// Whether to honour a provider `Retry-After` hint instead of the
    /// computed delay. Default: `true`.
    pub respect_retry_after: bool,
}

/// Jitter strategy to prevent thundering herd on shared rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// No jitter. Delay is exactly the calculated value.
    None,

    /// Full jitter: random value in `[0, calculated_delay]`.
    Full,

    /// Equal jitter: `calculated_delay/2 + random in [0, calculated_delay/2]`.
    Equal,
}

impl BackoffConfig {
    /// A single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::standard()
        }
    }

    /// Defaults for hosted APIs: 3 attempts, 500ms initial, 2x multiplier,
    /// 8s cap, full jitter, honours Retry-After.
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            jitter: JitterStrategy::Full,
            respect_retry_after: true,
        }
    }

    /// Tighter budget for a user waiting on the response:
    /// 2 attempts, 250ms initial, 2s cap.
    pub fn interactive() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(250),
            multiplier: 1.5,
            max_delay: Duration::from_secs(2),
            jitter: JitterStrategy::Full,
            respect_retry_after: true,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay before retry N (0-indexed).
    ///
    /// The base delay is `initial_delay * multiplier^retry`, capped at
    /// `max_delay`. Jitter is then applied according to the configured strategy.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };

        Duration::from_secs_f64(jittered)
    }

    /// Delay before retry N, preferring the provider's hint when allowed.
    pub fn delay_with_hint(&self, retry: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(ra) if self.respect_retry_after => ra,
            _ => self.delay_for_retry(retry),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::standard()
    }
}
