use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::resilience::CircuitBreakerSnapshot;

/// An untyped request body: a JSON object, consumed once by validation.
pub type RawRequest = Map<String, Value>;

/// What a pipeline does with a validated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Generate code from an instruction.
    Generate,
    /// Review the code carried in `prompt` and suggest improvements.
    Review,
    /// Explain the code carried in `prompt` step by step.
    Explain,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Generate => "generate",
            Task::Review => "review",
            Task::Explain => "explain",
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful pipeline output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

/// Overall service condition reported by [`HealthReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// The breaker is closed.
    Healthy,
    /// The breaker is open or probing; generation may be refused.
    Degraded,
}

/// Snapshot returned by `Pipeline::health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: ServiceStatus,
    pub model: String,
    pub circuit_breaker: CircuitBreakerSnapshot,
}
