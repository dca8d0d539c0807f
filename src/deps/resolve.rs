//! Per-request resolution of a [`DependencyGraph`].

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use super::graph::{BoxFut, DependencyGraph, NodeInput};
use crate::error::DependencyError;
use crate::events::{emit, Event, EventHandler};

type Outcome = Result<Value, DependencyError>;

/// Resolution state for one request.
///
/// Holds one cell per node. A node's producer runs inside its cell's
/// initialisation, so concurrent resolutions of the same node wait on the
/// single in-flight run and every caller sees the same outcome.
pub struct Resolution<'g> {
    graph: &'g DependencyGraph,
    request_id: String,
    headers: Arc<HeaderMap>,
    cache: HashMap<&'g str, OnceCell<Outcome>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl<'g> Resolution<'g> {
    pub fn new(graph: &'g DependencyGraph, request_id: impl Into<String>, headers: Arc<HeaderMap>) -> Self {
        Self {
            graph,
            request_id: request_id.into(),
            headers,
            cache: graph.ids().map(|id| (id, OnceCell::new())).collect(),
            event_handler: None,
        }
    }

    pub fn with_event_handler(mut self, handler: Option<Arc<dyn EventHandler>>) -> Self {
        self.event_handler = handler;
        self
    }

    /// Resolve one node and, transitively, everything it depends on.
    pub fn resolve<'a>(&'a self, id: &'a str) -> BoxFut<'a, Outcome> {
        Box::pin(self.resolve_cached(id))
    }

    async fn resolve_cached(&self, id: &str) -> Outcome {
        let cell = self.cache.get(id).ok_or_else(|| DependencyError::Failed {
            node: id.to_string(),
            message: "node not registered".to_string(),
        })?;
        cell.get_or_init(|| self.run(id)).await.clone()
    }

    /// Resolve every node in the graph.
    ///
    /// Fails with the first producer error; in-flight siblings are dropped.
    pub async fn resolve_all(&self) -> Result<Resolved, DependencyError> {
        let ids: Vec<&str> = self.graph.ids().collect();
        let values = try_join_all(ids.iter().map(|id| self.resolve(*id))).await?;
        Ok(Resolved {
            values: ids
                .into_iter()
                .map(str::to_string)
                .zip(values)
                .collect(),
        })
    }

    /// Number of nodes whose producer has finished in this request.
    pub fn resolved_count(&self) -> usize {
        self.cache.values().filter(|c| c.initialized()).count()
    }

    async fn run(&self, id: &str) -> Outcome {
        let node = self.graph.node(id).ok_or_else(|| DependencyError::Failed {
            node: id.to_string(),
            message: "node not registered".to_string(),
        })?;

        let values = try_join_all(node.deps().iter().map(|dep| self.resolve(dep))).await?;
        let input = NodeInput {
            request_id: self.request_id.clone(),
            headers: self.headers.clone(),
            deps: node.deps().iter().cloned().zip(values).collect(),
        };

        let outcome = node.producer().produce(input).await;
        debug!(
            request_id = %self.request_id,
            node = id,
            ok = outcome.is_ok(),
            "dependency resolved"
        );
        emit(
            &self.event_handler,
            Event::NodeResolved {
                node: id.to_string(),
                ok: outcome.is_ok(),
            },
        );
        outcome
    }
}

/// Values of every node resolved for a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    values: HashMap<String, Value>,
}

impl Resolved {
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.values.get(id)
    }

    /// Deserialize node `id` into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, id: &str) -> Result<T, DependencyError> {
        let value = self.values.get(id).ok_or_else(|| DependencyError::Failed {
            node: id.to_string(),
            message: "node was not resolved".to_string(),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| DependencyError::Failed {
            node: id.to_string(),
            message: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
