//! The code generation request: field set, language enum, typed record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::field::{FieldSpec, FieldType, FieldValue};
use super::rules;
use super::validator::{ValidatedFields, Validator};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::types::RawRequest;

pub const MIN_TOKENS: u32 = 1;
pub const MAX_TOKENS_LIMIT: u32 = 4000;
/// Longest accepted prompt, in characters.
pub const MAX_PROMPT_CHARS: usize = 32_000;

/// Target language of the generated code.
///
/// Parsing is case-insensitive; [`Language::as_str`] is the canonical
/// lowercase token. `Auto` leaves the choice to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Auto,
    Python,
    Javascript,
    Typescript,
    Rust,
    Go,
    Java,
    Kotlin,
    Swift,
    C,
    Cpp,
    Csharp,
    Ruby,
    Php,
    Scala,
    Sql,
    Bash,
    Html,
    Css,
}

impl Language {
    pub const ALL: &'static [Language] = &[
        Language::Auto,
        Language::Python,
        Language::Javascript,
        Language::Typescript,
        Language::Rust,
        Language::Go,
        Language::Java,
        Language::Kotlin,
        Language::Swift,
        Language::C,
        Language::Cpp,
        Language::Csharp,
        Language::Ruby,
        Language::Php,
        Language::Scala,
        Language::Sql,
        Language::Bash,
        Language::Html,
        Language::Css,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Auto => "auto",
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Java => "java",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Csharp => "csharp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Scala => "scala",
            Language::Sql => "sql",
            Language::Bash => "bash",
            Language::Html => "html",
            Language::Css => "css",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let token = s.trim().to_lowercase();
        let alias = match token.as_str() {
            "c++" => Some(Language::Cpp),
            "c#" | "cs" => Some(Language::Csharp),
            "js" | "node" => Some(Language::Javascript),
            "ts" => Some(Language::Typescript),
            "golang" => Some(Language::Go),
            "py" => Some(Language::Python),
            "sh" | "shell" => Some(Language::Bash),
            _ => None,
        };
        alias
            .or_else(|| Language::ALL.iter().copied().find(|l| l.as_str() == token))
            .ok_or_else(|| format!("unsupported language '{}'", s.trim()))
    }
}

/// Rule: accept any [`Language`] spelling, normalize to its canonical token.
fn language_rule(value: FieldValue) -> std::result::Result<FieldValue, String> {
    match value {
        FieldValue::Str(s) => s
            .parse::<Language>()
            .map(|l| FieldValue::Str(l.as_str().to_string())),
        other => Ok(other),
    }
}

/// A request whose every field satisfies its declared constraints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedRequest {
    pub prompt: String,
    pub language: Language,
    pub max_tokens: u32,
    pub temperature: f64,
    pub created_at: DateTime<Utc>,
    pub context: BTreeMap<String, String>,
}

/// The ordered field specs for a generation request, with defaults from `config`.
pub fn request_specs(config: &Config) -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("prompt", FieldType::Str)
            .required()
            .rule(rules::non_blank())
            .rule(rules::max_chars(MAX_PROMPT_CHARS)),
        FieldSpec::new("language", FieldType::Str)
            .with_default(FieldValue::Str(Language::Auto.as_str().to_string()))
            .rule(language_rule),
        FieldSpec::new("max_tokens", FieldType::Int)
            .with_default(FieldValue::Int(config.default_max_tokens as i64))
            .rule(rules::int_range(MIN_TOKENS as i64, MAX_TOKENS_LIMIT as i64)),
        FieldSpec::new("temperature", FieldType::Float)
            .with_default(FieldValue::Float(config.default_temperature))
            .rule(rules::float_range(0.0, 1.0)),
        FieldSpec::new("created_at", FieldType::Timestamp)
            .with_default_fn(|| FieldValue::Timestamp(Utc::now())),
        FieldSpec::new("context", FieldType::Map)
            .with_default(FieldValue::Map(BTreeMap::new())),
    ]
}

/// Validator specialised to [`ValidatedRequest`].
#[derive(Debug, Clone)]
pub struct RequestValidator {
    inner: Validator,
}

impl RequestValidator {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Validator::new(request_specs(config)),
        }
    }

    /// Validate and build the typed request.
    ///
    /// Constraint failures are a [`PipelineError::Validation`]; a field set
    /// that validates but cannot be assembled is an internal error.
    pub fn validate(&self, raw: &RawRequest) -> Result<ValidatedRequest> {
        let fields = self.inner.validate(raw)?;
        ValidatedRequest::from_fields(&fields)
    }
}

impl ValidatedRequest {
    fn from_fields(fields: &ValidatedFields) -> Result<Self> {
        let missing = |name: &str| PipelineError::Internal(format!("validated field '{}' missing or mistyped", name));

        let prompt = fields
            .get("prompt")
            .and_then(FieldValue::as_str)
            .ok_or_else(|| missing("prompt"))?
            .to_string();
        let language = fields
            .get("language")
            .and_then(FieldValue::as_str)
            .ok_or_else(|| missing("language"))?
            .parse::<Language>()
            .map_err(PipelineError::Internal)?;
        let max_tokens = fields
            .get("max_tokens")
            .and_then(FieldValue::as_int)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| missing("max_tokens"))?;
        let temperature = fields
            .get("temperature")
            .and_then(FieldValue::as_float)
            .ok_or_else(|| missing("temperature"))?;
        let created_at = fields
            .get("created_at")
            .and_then(FieldValue::as_timestamp)
            .ok_or_else(|| missing("created_at"))?;
        let context = fields
            .get("context")
            .and_then(FieldValue::as_map)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            prompt,
            language,
            max_tokens,
            temperature,
            created_at,
            context,
        })
    }
}
