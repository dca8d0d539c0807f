use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A single failed field constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Name of the offending field.
    pub field: String,
    /// Human-readable description of the constraint that failed.
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Every constraint violation found in a request, in field declaration order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("request failed validation ({} violation(s))", .violations.len())]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

/// Startup-time misconfiguration. A pipeline is never built in this state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The dependency graph contains a cycle. `path` starts and ends at the same node.
    #[error("dependency cycle: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    /// A node declares a dependency that was never registered.
    #[error("node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    /// Two nodes were registered under the same id.
    #[error("duplicate dependency node '{0}'")]
    DuplicateNode(String),

    /// A required setting is empty.
    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),

    /// A setting is present but outside its allowed range.
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Authentication failures produced by the `auth` dependency node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer credentials")]
    MissingCredentials,

    #[error("invalid credentials")]
    InvalidCredentials,
}

/// Failure of a dependency producer. Propagated unchanged to every dependant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The caller's identity exhausted its request window.
    #[error("rate limit exceeded; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Any other producer failure.
    #[error("dependency '{node}' failed: {message}")]
    Failed { node: String, message: String },
}

/// Outcome taxonomy for calls to the generation provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The attempt did not complete before the deadline or HTTP timeout.
    #[error("generation timed out")]
    Timeout,

    /// The provider answered 429.
    #[error("provider rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    /// The provider answered with a non-success status or an unusable body.
    #[error("provider error {status}: {message}")]
    Provider { status: u16, message: String },

    /// Connection-level failure before a status was received.
    #[error("network error: {0}")]
    Network(String),

    /// The circuit breaker rejected the call without contacting the provider.
    #[error("circuit breaker open; retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    /// The caller cancelled the invocation.
    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Whether another attempt may succeed: timeouts, 429, network
    /// failures and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Timeout
            | GenerationError::RateLimited { .. }
            | GenerationError::Network(_) => true,
            GenerationError::Provider { status, .. } => (500..600).contains(status),
            GenerationError::CircuitOpen { .. } | GenerationError::Cancelled => false,
        }
    }

    /// Server-provided retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Errors surfaced by a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Unexpected failure. The message is logged, never shown to callers.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Internal(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

/// Caller-facing classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    PayloadTooLarge,
    RateLimited,
    UpstreamTimeout,
    UpstreamRateLimited,
    UpstreamError,
    UpstreamUnavailable,
    ServiceUnavailable,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::UpstreamRateLimited => "upstream_rate_limited",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// Fixed message template shown to callers.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "The request failed validation.",
            ErrorKind::Unauthorized => "Authentication is required to use this service.",
            ErrorKind::PayloadTooLarge => "The request body is too large.",
            ErrorKind::RateLimited => "Too many requests. Please slow down and try again later.",
            ErrorKind::UpstreamTimeout => "The code generator took too long to respond.",
            ErrorKind::UpstreamRateLimited => {
                "The code generator is busy right now. Please try again shortly."
            }
            ErrorKind::UpstreamError => "The code generator returned an error.",
            ErrorKind::UpstreamUnavailable => "The code generator could not be reached.",
            ErrorKind::ServiceUnavailable => {
                "Code generation is temporarily unavailable. Please try again later."
            }
            ErrorKind::Cancelled => "The request was cancelled.",
            ErrorKind::Internal => "An internal error occurred.",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::RateLimited => 429,
            ErrorKind::UpstreamTimeout => 504,
            ErrorKind::UpstreamRateLimited => 503,
            ErrorKind::UpstreamError | ErrorKind::UpstreamUnavailable => 502,
            ErrorKind::ServiceUnavailable | ErrorKind::Cancelled => 503,
            ErrorKind::Internal => 500,
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::BadRequest,
            PipelineError::Dependency(DependencyError::Auth(_)) => ErrorKind::Unauthorized,
            PipelineError::Dependency(DependencyError::RateLimited { .. }) => {
                ErrorKind::RateLimited
            }
            PipelineError::Dependency(DependencyError::Failed { .. }) => ErrorKind::Internal,
            PipelineError::Generation(e) => match e {
                GenerationError::Timeout => ErrorKind::UpstreamTimeout,
                GenerationError::RateLimited { .. } => ErrorKind::UpstreamRateLimited,
                GenerationError::Provider { .. } => ErrorKind::UpstreamError,
                GenerationError::Network(_) => ErrorKind::UpstreamUnavailable,
                GenerationError::CircuitOpen { .. } => ErrorKind::ServiceUnavailable,
                GenerationError::Cancelled => ErrorKind::Cancelled,
            },
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Seconds the caller should wait before retrying, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::Dependency(DependencyError::RateLimited { retry_after }) => {
                Some(*retry_after)
            }
            PipelineError::Generation(GenerationError::CircuitOpen { retry_in }) => {
                Some(*retry_in)
            }
            PipelineError::Generation(e) => e.retry_after(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
