//! Request-scoped dependency graph.
//!
//! A [`DependencyGraph`] is declared once at startup and checked for
//! duplicate ids, dangling edges and cycles. Each request gets a fresh
//! [`Resolution`] that runs every producer at most once and shares the
//! outcome with all dependants.

pub mod builtin;
pub mod graph;
pub mod rate_limit;
pub mod resolve;

pub use builtin::{
    auth_node, rate_limit_node, Authenticator, Identity, StaticKeyAuthenticator, AUTH_NODE,
    RATE_LIMIT_NODE,
};
pub use graph::{BoxFut, DependencyGraph, DependencyGraphBuilder, DependencyNode, FnProducer, NodeInput, Producer};
pub use rate_limit::{RateLimiter, RateLimiterSnapshot};
pub use resolve::{Resolution, Resolved};
