//! Transport-neutral request/response types and error shaping.
//!
//! The embedding server owns sockets, framing and routing. It converts its
//! own request type into a [`TransportRequest`], hands it to
//! `Pipeline::handle`, and writes the [`TransportResponse`] back out.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::error::{ErrorKind, PipelineError, ValidationError, Violation};
use crate::types::RawRequest;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// An inbound request as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    /// Case-insensitive header map.
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// A `POST` carrying `body` serialized as JSON.
    pub fn post_json(path: impl Into<String>, body: &Value) -> Self {
        let mut req = Self::new(Method::POST, path);
        req.body = body.to_string().into_bytes();
        req.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        req
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header(REQUEST_ID_HEADER)
    }
}

/// An outbound response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// A JSON response with the given status.
    pub fn json<T: Serialize>(status: StatusCode, body: &T) -> Self {
        let body = match serde_json::to_vec(body) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to serialize response body");
                return Self::from_kind(ErrorKind::Internal);
            }
        };
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status,
            headers,
            body,
        }
    }

    /// An error response carrying only the kind and its fixed message.
    pub fn from_kind(kind: ErrorKind) -> Self {
        let body = error_body(kind, None).to_string().into_bytes();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status: status_for(kind),
            headers,
            body,
        }
    }

    /// Shape a pipeline failure. Internal detail never reaches the body.
    pub fn from_error(err: &PipelineError) -> Self {
        let kind = err.kind();
        let violations = match err {
            PipelineError::Validation(v) => Some(v.violations.as_slice()),
            _ => None,
        };
        let mut resp = Self::json(status_for(kind), &error_body(kind, violations));
        if let Some(retry_after) = err.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(retry_after).to_string()) {
                resp.headers.insert(RETRY_AFTER, value);
            }
        }
        resp
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parse the body as JSON.
    pub fn body_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Whole seconds for a `Retry-After` header, rounded up, at least 1.
fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

/// `{"error": {"kind", "message", "violations"?}}`.
pub fn error_body(kind: ErrorKind, violations: Option<&[Violation]>) -> Value {
    let mut inner = json!({
        "kind": kind.as_str(),
        "message": kind.user_message(),
    });
    if let Some(violations) = violations {
        inner["violations"] = json!(violations);
    }
    json!({ "error": inner })
}

/// Decode a request body into a [`RawRequest`].
///
/// Anything other than a JSON object is a single `body` violation.
pub fn parse_body(body: &[u8]) -> Result<RawRequest, ValidationError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(body_violation("must be a JSON object")),
        Err(_) => Err(body_violation("must be valid JSON")),
    }
}

fn body_violation(message: &str) -> ValidationError {
    ValidationError {
        violations: vec![Violation::new("body", message)],
    }
}
