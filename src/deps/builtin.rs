//! Built-in dependency nodes: caller authentication and rate limiting.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::graph::{BoxFut, DependencyNode, NodeInput, Producer};
use super::rate_limit::RateLimiter;
use crate::error::{AuthError, DependencyError};

pub const AUTH_NODE: &str = "auth";
pub const RATE_LIMIT_NODE: &str = "rate_limit";

/// Identity used when no access keys are configured.
pub const ANONYMOUS: &str = "anonymous";

/// The authenticated caller, as produced by the `auth` node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(pub String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Maps request headers to a caller identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError>;
}

/// Bearer-key authenticator over a fixed key table.
///
/// With an empty table every caller is [`ANONYMOUS`] and headers are not
/// inspected.
#[derive(Clone, Default)]
pub struct StaticKeyAuthenticator {
    keys: HashMap<String, String>,
}

impl std::fmt::Debug for StaticKeyAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyAuthenticator")
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl StaticKeyAuthenticator {
    pub fn new(keys: HashMap<String, String>) -> Self {
        Self { keys }
    }

    pub fn is_open(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[async_trait]
impl Authenticator for StaticKeyAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        if self.is_open() {
            return Ok(Identity(ANONYMOUS.to_string()));
        }
        let token = bearer_token(headers).ok_or(AuthError::MissingCredentials)?;
        self.keys
            .get(token)
            .map(|identity| Identity(identity.clone()))
            .ok_or(AuthError::InvalidCredentials)
    }
}

struct AuthProducer {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthProducer {
    async fn run(&self, input: NodeInput) -> Result<Value, DependencyError> {
        let identity = self.authenticator.authenticate(&input.headers).await?;
        serde_json::to_value(identity).map_err(|e| DependencyError::Failed {
            node: AUTH_NODE.to_string(),
            message: e.to_string(),
        })
    }
}

impl Producer for AuthProducer {
    fn produce<'a>(&'a self, input: NodeInput) -> BoxFut<'a, Result<Value, DependencyError>> {
        Box::pin(self.run(input))
    }
}

struct RateLimitProducer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitProducer {
    async fn run(&self, input: NodeInput) -> Result<Value, DependencyError> {
        let identity: Identity = input.dep_as(AUTH_NODE)?;
        let remaining = self.limiter.check(identity.as_str())?;
        Ok(serde_json::json!({ "remaining": remaining }))
    }
}

impl Producer for RateLimitProducer {
    fn produce<'a>(&'a self, input: NodeInput) -> BoxFut<'a, Result<Value, DependencyError>> {
        Box::pin(self.run(input))
    }
}

/// The `auth` node.
pub fn auth_node(authenticator: Arc<dyn Authenticator>) -> DependencyNode {
    DependencyNode::new(AUTH_NODE, AuthProducer { authenticator })
}

/// The `rate_limit` node, charging one request per resolution.
pub fn rate_limit_node(limiter: Arc<RateLimiter>) -> DependencyNode {
    DependencyNode::new(RATE_LIMIT_NODE, RateLimitProducer { limiter }).depends_on(AUTH_NODE)
}
