//! Request/response hooks composed around `Pipeline::handle`.
//!
//! Middleware is an explicit ordered list fixed at build time.
//! `on_request` runs front to back and may answer the request itself;
//! `on_response` runs back to front over every middleware whose
//! `on_request` ran.

use reqwest::header::HeaderValue;
use tracing::debug;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::transport::{TransportRequest, TransportResponse, REQUEST_ID_HEADER};

pub trait Middleware: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Inspect or modify the request. Returning a response short-circuits
    /// the pipeline.
    fn on_request(&self, _req: &mut TransportRequest) -> Option<TransportResponse> {
        None
    }

    fn on_response(&self, _req: &TransportRequest, _resp: &mut TransportResponse) {}
}

/// Ensures every request carries an `x-request-id` and echoes it on the
/// response. A caller-supplied id is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestId;

impl Middleware for RequestId {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn on_request(&self, req: &mut TransportRequest) -> Option<TransportResponse> {
        let present = req.request_id().is_some_and(|id| !id.trim().is_empty());
        if !present {
            if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
                req.headers.insert(REQUEST_ID_HEADER, value);
            }
        }
        None
    }

    fn on_response(&self, req: &TransportRequest, resp: &mut TransportResponse) {
        if let Some(id) = req.headers.get(REQUEST_ID_HEADER) {
            resp.headers.insert(REQUEST_ID_HEADER, id.clone());
        }
    }
}

/// Rejects bodies larger than `max_bytes` with 413.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimit {
    max_bytes: usize,
}

impl BodyLimit {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl Middleware for BodyLimit {
    fn name(&self) -> &'static str {
        "body_limit"
    }

    fn on_request(&self, req: &mut TransportRequest) -> Option<TransportResponse> {
        if req.body.len() > self.max_bytes {
            debug!(len = req.body.len(), max = self.max_bytes, "request body over limit");
            return Some(TransportResponse::from_kind(ErrorKind::PayloadTooLarge));
        }
        None
    }
}
