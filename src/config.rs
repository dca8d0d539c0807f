//! Read-only service configuration.
//!
//! The embedding process fills a [`Config`] however it likes (environment,
//! file, secrets manager); this crate never reads the environment itself.
//! [`Config::validate`] runs once when the pipeline is built.

use std::collections::HashMap;
use std::time::Duration;

use crate::backend::BackoffConfig;
use crate::error::ConfigError;
use crate::validation::request::{MAX_TOKENS_LIMIT, MIN_TOKENS};

/// Default instruction preamble for the code generation assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an AI code generation assistant specialized in building software projects.

Guidelines:
- If the user asks for a full project, structure it clearly (e.g. folders, files).
- If the user specifies a stack (language, framework, tools) in their prompt, follow it exactly.
- If no stack is specified, suggest 2-5 relevant stacks, from basic to advanced by implementation difficulty, and ask the user to choose before proceeding.
- Once confirmed, build out the project step by step, including core files and essential setup.
- Always write clean, production-ready code.
- Include comments only for complex logic.
- Do not include explanations unless the user explicitly asks.
- Use appropriate file/folder names and clearly separate backend, frontend, and config files when relevant.";

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL_ID: &str = "llama3-8b-8192";

/// Typed service configuration.
#[derive(Clone)]
pub struct Config {
    /// Bearer key for the generation provider.
    pub provider_api_key: String,
    pub provider_base_url: String,
    pub model_id: String,
    /// Token budget used when the request omits `max_tokens`.
    pub default_max_tokens: u32,
    /// Hard ceiling on the budget sent to the provider.
    pub provider_max_tokens: u32,
    pub default_temperature: f64,
    pub system_prompt: String,
    /// Requests allowed per identity per window.
    pub rate_limit_threshold: u32,
    pub rate_limit_window: Duration,
    /// Consecutive failed attempts that open the breaker.
    pub circuit_breaker_threshold: u32,
    pub cool_down: Duration,
    pub backoff: BackoffConfig,
    /// Budget for the whole provider attempt sequence of one request.
    pub request_deadline: Duration,
    /// Per-attempt HTTP timeout.
    pub http_timeout: Duration,
    /// Accepted caller keys mapped to identities. Empty: every caller is
    /// the anonymous identity.
    pub access_keys: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_api_key: String::new(),
            provider_base_url: DEFAULT_BASE_URL.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            default_max_tokens: 1500,
            provider_max_tokens: MAX_TOKENS_LIMIT,
            default_temperature: 0.5,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            rate_limit_threshold: 60,
            rate_limit_window: Duration::from_secs(60),
            circuit_breaker_threshold: 5,
            cool_down: Duration::from_secs(30),
            backoff: BackoffConfig::standard(),
            request_deadline: Duration::from_secs(45),
            http_timeout: Duration::from_secs(20),
            access_keys: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("provider_api_key", &"***")
            .field("provider_base_url", &self.provider_base_url)
            .field("model_id", &self.model_id)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("provider_max_tokens", &self.provider_max_tokens)
            .field("default_temperature", &self.default_temperature)
            .field("system_prompt_len", &self.system_prompt.len())
            .field("rate_limit_threshold", &self.rate_limit_threshold)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("circuit_breaker_threshold", &self.circuit_breaker_threshold)
            .field("cool_down", &self.cool_down)
            .field("backoff", &self.backoff)
            .field("request_deadline", &self.request_deadline)
            .field("http_timeout", &self.http_timeout)
            .field("access_keys", &self.access_keys.len())
            .finish()
    }
}

impl Config {
    /// Defaults plus the provider key.
    pub fn new(provider_api_key: impl Into<String>) -> Self {
        Self {
            provider_api_key: provider_api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.provider_base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_id = model.into();
        self
    }

    pub fn with_default_max_tokens(mut self, tokens: u32) -> Self {
        self.default_max_tokens = tokens;
        self
    }

    pub fn with_provider_max_tokens(mut self, ceiling: u32) -> Self {
        self.provider_max_tokens = ceiling;
        self
    }

    pub fn with_default_temperature(mut self, temp: f64) -> Self {
        self.default_temperature = temp;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_rate_limit(mut self, threshold: u32, window: Duration) -> Self {
        self.rate_limit_threshold = threshold;
        self.rate_limit_window = window;
        self
    }

    pub fn with_circuit_breaker(mut self, threshold: u32, cool_down: Duration) -> Self {
        self.circuit_breaker_threshold = threshold;
        self.cool_down = cool_down;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Accept `key` from callers and attribute it to `identity`.
    pub fn with_access_key(mut self, key: impl Into<String>, identity: impl Into<String>) -> Self {
        self.access_keys.insert(key.into(), identity.into());
        self
    }

    /// Reject configurations the pipeline cannot serve with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider_api_key.trim().is_empty() {
            return Err(ConfigError::MissingSetting("provider_api_key"));
        }
        if self.model_id.trim().is_empty() {
            return Err(ConfigError::MissingSetting("model_id"));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(ConfigError::MissingSetting("system_prompt"));
        }
        if !(MIN_TOKENS..=MAX_TOKENS_LIMIT).contains(&self.default_max_tokens) {
            return Err(invalid(
                "default_max_tokens",
                format!("must be in [{}, {}]", MIN_TOKENS, MAX_TOKENS_LIMIT),
            ));
        }
        if self.provider_max_tokens == 0 {
            return Err(invalid("provider_max_tokens", "must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.default_temperature) {
            return Err(invalid("default_temperature", "must be in [0, 1]".into()));
        }
        if self.rate_limit_threshold == 0 {
            return Err(invalid("rate_limit_threshold", "must be at least 1".into()));
        }
        if self.rate_limit_window.is_zero() {
            return Err(invalid("rate_limit_window", "must be non-zero".into()));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(invalid("circuit_breaker_threshold", "must be at least 1".into()));
        }
        if self.backoff.max_attempts == 0 {
            return Err(invalid("backoff.max_attempts", "must be at least 1".into()));
        }
        if self.request_deadline.is_zero() {
            return Err(invalid("request_deadline", "must be non-zero".into()));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidSetting { name, reason }
}
