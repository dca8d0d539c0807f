//! Resilience policy around the generation provider.
//!
//! - [`CircuitBreaker`]: process-wide closed/open/half-open gate.
//! - [`ResilientClient`]: retry with backoff inside one shared deadline,
//!   every attempt admitted and recorded by the breaker.

pub mod circuit_breaker;
pub mod client;

pub use circuit_breaker::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, Permit,
};
pub use client::{ResilientClient, ResilientClientBuilder};
