//! # Codegen Pipeline
//!
//! Request pipeline for an AI code generation service.
//!
//! A caller submits a prompt and a language hint. The pipeline validates the
//! request, resolves request-scoped dependencies (authentication, rate
//! limiting), assembles the generation instruction, calls an
//! OpenAI-compatible provider under a retry/deadline/circuit-breaker policy,
//! and shapes the outcome into a response.
//!
//! Sockets, routing and environment loading belong to the embedding server.
//! This crate provides what runs between "a request arrived" and "here is
//! the response".
//!
//! ## Core Concepts
//!
//! - **[`Pipeline`]**: the orchestrator. [`Pipeline::run`] takes a raw JSON
//!   object; [`Pipeline::handle`] takes a [`TransportRequest`] and applies
//!   middleware, decoding and error shaping.
//! - **[`validation`]**: declarative [`FieldSpec`](validation::FieldSpec)s with
//!   lossless coercion; every violation is reported at once.
//! - **[`deps`]**: an acyclic graph of request-scoped producers, each run at
//!   most once per request.
//! - **[`PromptBuilder`]**: pure assembly of the instruction text.
//! - **[`ResilientClient`]**: retries with backoff inside one deadline, gated
//!   by a process-wide [`CircuitBreaker`](resilience::CircuitBreaker).
//!
//! ## Quick Start
//!
//! ```no_run
//! use codegen_pipeline::{Config, Pipeline};
//! use codegen_pipeline::middleware::{BodyLimit, RequestId};
//! use codegen_pipeline::transport::TransportRequest;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new(std::env::var("GROQ_API_KEY")?);
//!     let pipeline = Pipeline::builder(config)
//!         .middleware(Arc::new(RequestId))
//!         .middleware(Arc::new(BodyLimit::new(64 * 1024)))
//!         .build()?;
//!
//!     let resp = pipeline
//!         .handle(TransportRequest::post_json(
//!             "/generate",
//!             &json!({"prompt": "Write a function to reverse a list", "language": "python"}),
//!         ))
//!         .await;
//!     println!("{}: {}", resp.status, String::from_utf8_lossy(&resp.body));
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod deps;
pub mod error;
pub mod events;
pub mod middleware;
pub mod pipeline;
pub mod prompt;
pub mod resilience;
pub mod transport;
pub mod types;
pub mod validation;

pub use backend::{Backend, BackoffConfig, GenerationJob, MockBackend, OpenAiBackend};
pub use config::Config;
pub use error::{ErrorKind, GenerationError, PipelineError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use pipeline::{Pipeline, PipelineBuilder, Stage};
pub use prompt::PromptBuilder;
pub use resilience::ResilientClient;
pub use transport::{TransportRequest, TransportResponse};
pub use types::{GenerateResponse, HealthReport, RawRequest, Task};
pub use validation::{Language, ValidatedRequest};
