//! Dependency nodes and the validated graph they form.
//!
//! Nodes produce `serde_json::Value`s so producers of different shapes can
//! live in one graph; dependants extract typed values with
//! [`NodeInput::dep_as`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConfigError, DependencyError};

/// A boxed, pinned, Send future. The return type of [`Producer::produce`].
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a producer sees when it runs: the request headers and the values
/// of the nodes it declared as dependencies.
#[derive(Debug, Clone)]
pub struct NodeInput {
    pub request_id: String,
    pub headers: Arc<HeaderMap>,
    pub deps: HashMap<String, Value>,
}

impl NodeInput {
    /// Header value as a string, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn dep(&self, id: &str) -> Option<&Value> {
        self.deps.get(id)
    }

    /// Deserialize the value of dependency `id`.
    pub fn dep_as<T: DeserializeOwned>(&self, id: &str) -> Result<T, DependencyError> {
        let value = self.deps.get(id).ok_or_else(|| DependencyError::Failed {
            node: id.to_string(),
            message: "dependency value not available".to_string(),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| DependencyError::Failed {
            node: id.to_string(),
            message: e.to_string(),
        })
    }
}

/// Object-safe trait for request-scoped producers.
///
/// A producer runs at most once per request. Its outcome, success or
/// failure, is shared by every dependant.
pub trait Producer: Send + Sync {
    fn produce<'a>(&'a self, input: NodeInput) -> BoxFut<'a, Result<Value, DependencyError>>;
}

/// A [`Producer`] backed by an async closure.
///
/// ```
/// use codegen_pipeline::deps::{DependencyNode, FnProducer};
/// use codegen_pipeline::error::DependencyError;
/// use serde_json::json;
///
/// let node = DependencyNode::new(
///     "tenant",
///     FnProducer(|input: codegen_pipeline::deps::NodeInput| async move {
///         Ok::<_, DependencyError>(json!(input.header("x-tenant").unwrap_or("default")))
///     }),
/// );
/// assert_eq!(node.id(), "tenant");
/// ```
pub struct FnProducer<F>(pub F);

impl<F, Fut> Producer for FnProducer<F>
where
    F: Fn(NodeInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, DependencyError>> + Send + 'static,
{
    fn produce<'a>(&'a self, input: NodeInput) -> BoxFut<'a, Result<Value, DependencyError>> {
        Box::pin((self.0)(input))
    }
}

/// One node of the dependency graph.
#[derive(Clone)]
pub struct DependencyNode {
    id: String,
    deps: Vec<String>,
    producer: Arc<dyn Producer>,
}

impl std::fmt::Debug for DependencyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyNode")
            .field("id", &self.id)
            .field("deps", &self.deps)
            .finish()
    }
}

impl DependencyNode {
    pub fn new(id: impl Into<String>, producer: impl Producer + 'static) -> Self {
        Self::from_arc(id, Arc::new(producer))
    }

    pub fn from_arc(id: impl Into<String>, producer: Arc<dyn Producer>) -> Self {
        Self {
            id: id.into(),
            deps: Vec::new(),
            producer,
        }
    }

    /// Declare a dependency on another node.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.deps.push(id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    pub(crate) fn producer(&self) -> &Arc<dyn Producer> {
        &self.producer
    }
}

/// An acyclic set of nodes with every dependency registered.
///
/// Only obtainable through [`DependencyGraphBuilder::build`], so holding one
/// is proof the checks passed.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, DependencyNode>,
    order: Vec<String>,
}

impl DependencyGraph {
    pub fn builder() -> DependencyGraphBuilder {
        DependencyGraphBuilder::default()
    }

    pub fn node(&self, id: &str) -> Option<&DependencyNode> {
        self.nodes.get(id)
    }

    /// Node ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Builder for [`DependencyGraph`].
#[derive(Debug, Default)]
pub struct DependencyGraphBuilder {
    nodes: Vec<DependencyNode>,
}

impl DependencyGraphBuilder {
    pub fn node(mut self, node: DependencyNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add(&mut self, node: DependencyNode) {
        self.nodes.push(node);
    }

    /// Check ids, edges and acyclicity.
    pub fn build(self) -> Result<DependencyGraph, ConfigError> {
        let mut nodes = HashMap::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());
        for node in self.nodes {
            if nodes.contains_key(&node.id) {
                return Err(ConfigError::DuplicateNode(node.id));
            }
            order.push(node.id.clone());
            nodes.insert(node.id.clone(), node);
        }

        for id in &order {
            for dep in &nodes[id].deps {
                if !nodes.contains_key(dep) {
                    return Err(ConfigError::UnknownDependency {
                        node: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let graph = DependencyGraph { nodes, order };
        check_acyclic(&graph)?;
        Ok(graph)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

fn check_acyclic(graph: &DependencyGraph) -> Result<(), ConfigError> {
    let mut colors: HashMap<&str, Color> =
        graph.order.iter().map(|id| (id.as_str(), Color::White)).collect();
    let mut path = Vec::new();
    for id in &graph.order {
        if colors[id.as_str()] == Color::White {
            visit(graph, id, &mut colors, &mut path)?;
        }
    }
    Ok(())
}

fn visit<'g>(
    graph: &'g DependencyGraph,
    id: &'g str,
    colors: &mut HashMap<&'g str, Color>,
    path: &mut Vec<&'g str>,
) -> Result<(), ConfigError> {
    colors.insert(id, Color::Gray);
    path.push(id);
    for dep in &graph.nodes[id].deps {
        match colors.get(dep.as_str()).copied().unwrap_or(Color::White) {
            Color::Gray => {
                // back edge: the cycle is the path from `dep` to here, closed on `dep`
                let start = path.iter().position(|p| *p == dep.as_str()).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.clone());
                return Err(ConfigError::DependencyCycle { path: cycle });
            }
            Color::White => visit(graph, dep, colors, path)?,
            Color::Black => {}
        }
    }
    path.pop();
    colors.insert(id, Color::Black);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(id: &str) -> DependencyNode {
        let value = json!(id);
        DependencyNode::new(id, FnProducer(move |_: NodeInput| {
            let value = value.clone();
            async move { Ok::<_, DependencyError>(value) }
        }))
    }

    #[test]
    fn test_builds_diamond() {
        let graph = DependencyGraph::builder()
            .node(leaf("a"))
            .node(leaf("b").depends_on("a"))
            .node(leaf("c").depends_on("a"))
            .node(leaf("d").depends_on("b").depends_on("c"))
            .build()
            .unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.ids().collect::<Vec<_>>(), vec!["a", "b", "c", "d"]);
        assert_eq!(graph.node("d").unwrap().deps(), &["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_rejects_cycle_with_path() {
        let err = DependencyGraph::builder()
            .node(leaf("a").depends_on("b"))
            .node(leaf("b").depends_on("c"))
            .node(leaf("c").depends_on("a"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::DependencyCycle {
                path: vec!["a".into(), "b".into(), "c".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_rejects_self_loop() {
        let err = DependencyGraph::builder()
            .node(leaf("a").depends_on("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCycle { .. }));
    }

    #[test]
    fn test_rejects_unknown_and_duplicate() {
        let err = DependencyGraph::builder()
            .node(leaf("a").depends_on("ghost"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownDependency {
                node: "a".into(),
                dependency: "ghost".into()
            }
        );

        let err = DependencyGraph::builder()
            .node(leaf("a"))
            .node(leaf("a"))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateNode("a".into()));
    }

    #[test]
    fn test_node_input_dep_as() {
        let input = NodeInput {
            request_id: "r1".into(),
            headers: Arc::new(HeaderMap::new()),
            deps: HashMap::from([("n".to_string(), json!(3))]),
        };
        assert_eq!(input.dep_as::<u32>("n").unwrap(), 3);
        assert!(input.dep_as::<String>("n").is_err());
        assert!(input.dep_as::<u32>("missing").is_err());
        assert!(input.header("authorization").is_none());
    }
}
