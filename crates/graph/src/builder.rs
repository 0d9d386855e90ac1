//! Fluent graph builder and the immutable compiled graph it produces

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{node::Node, state::GraphState};

/// Edge target that ends the run.
pub const END: &str = "__end__";

pub type EdgePredicate<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

pub struct Branch<S> {
    pub predicate: EdgePredicate<S>,
    pub target: String,
}

impl<S> Clone for Branch<S> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
            target: self.target.clone(),
        }
    }
}

/// Outgoing edges of one node: ordered conditional branches plus an
/// optional default. A node with only a default is a linear edge.
pub struct EdgeSpec<S> {
    pub branches: Vec<Branch<S>>,
    pub default: Option<String>,
}

impl<S> EdgeSpec<S> {
    fn new() -> Self {
        Self {
            branches: Vec::new(),
            default: None,
        }
    }

    pub fn is_linear(&self) -> bool {
        self.branches.is_empty()
    }

    fn targets(&self) -> impl Iterator<Item = &str> {
        self.branches
            .iter()
            .map(|b| b.target.as_str())
            .chain(self.default.as_deref())
    }
}

impl<S> Clone for EdgeSpec<S> {
    fn clone(&self) -> Self {
        Self {
            branches: self.branches.clone(),
            default: self.default.clone(),
        }
    }
}

/// Descriptive fields with no runtime effect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl GraphMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Configuration errors detected while compiling a graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("graph has no entry node")]
    MissingEntry,

    #[error("entry node '{0}' is not registered")]
    UnknownEntry(String),

    #[error("node '{0}' is registered more than once")]
    DuplicateNode(String),

    #[error("node '{0}' already has a default edge")]
    DuplicateEdge(String),

    #[error("edge source '{0}' is not a registered node")]
    UnknownEdgeSource(String),

    #[error("edge from '{from}' references unknown node '{to}'")]
    DanglingEdge { from: String, to: String },

    #[error("node '{0}' is unreachable from the entry node")]
    UnreachableNode(String),

    #[error("then('{0}') called before start()")]
    ThenBeforeStart(String),
}

pub(crate) enum Routing {
    Next(String),
    End,
    NoMatch,
}

pub struct GraphBuilder<S: GraphState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    order: Vec<String>,
    edges: HashMap<String, EdgeSpec<S>>,
    entry: Option<String>,
    cursor: Option<String>,
    errors: Vec<GraphError>,
}

impl<S: GraphState> GraphBuilder<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: HashMap::new(),
            entry: None,
            cursor: None,
            errors: Vec::new(),
        }
    }

    /// Register `node` as the entry point and start a linear chain from it.
    pub fn start(mut self, node: impl Node<S> + 'static) -> Self {
        let id = self.register(Arc::new(node));
        self.entry = Some(id.clone());
        self.cursor = Some(id);
        self
    }

    /// Register `node` and link the previous node of the chain to it.
    pub fn then(mut self, node: impl Node<S> + 'static) -> Self {
        let id = self.register(Arc::new(node));
        match self.cursor.take() {
            Some(previous) => self.link(&previous, &id),
            None => self.errors.push(GraphError::ThenBeforeStart(id.clone())),
        }
        self.cursor = Some(id);
        self
    }

    /// Register a node outside the linear chain; wire it with edges.
    pub fn add_node(mut self, node: impl Node<S> + 'static) -> Self {
        self.register(Arc::new(node));
        self
    }

    /// Set the default successor of `from`. With conditional branches present
    /// the default is taken only when no branch matches.
    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.link(from, to);
        self
    }

    /// Append a conditional branch to `from`. Branches are tested in the
    /// order they were added, against the state after `from` merged.
    pub fn add_conditional_edge<P>(mut self, from: &str, predicate: P, to: &str) -> Self
    where
        P: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.edges
            .entry(from.to_string())
            .or_insert_with(EdgeSpec::new)
            .branches
            .push(Branch {
                predicate: Arc::new(predicate),
                target: to.to_string(),
            });
        self
    }

    /// Compile with empty metadata.
    pub fn end(self) -> Result<CompiledGraph<S>, GraphError> {
        self.compile(GraphMetadata::default())
    }

    pub fn compile(self, metadata: GraphMetadata) -> Result<CompiledGraph<S>, GraphError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }

        let entry = self.entry.ok_or(GraphError::MissingEntry)?;
        if !self.nodes.contains_key(&entry) {
            return Err(GraphError::UnknownEntry(entry));
        }

        for id in &self.order {
            let Some(spec) = self.edges.get(id) else {
                continue;
            };
            for target in spec.targets() {
                if target != END && !self.nodes.contains_key(target) {
                    return Err(GraphError::DanglingEdge {
                        from: id.clone(),
                        to: target.to_string(),
                    });
                }
            }
        }
        if let Some(source) = self.edges.keys().find(|id| !self.nodes.contains_key(*id)) {
            return Err(GraphError::UnknownEdgeSource(source.clone()));
        }

        let mut reachable: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([entry.as_str()]);
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(spec) = self.edges.get(id) {
                queue.extend(spec.targets().filter(|t| *t != END));
            }
        }
        if let Some(orphan) = self.order.iter().find(|id| !reachable.contains(id.as_str())) {
            return Err(GraphError::UnreachableNode(orphan.clone()));
        }

        tracing::debug!(
            "[GRAPH] Compiled graph '{}' with {} nodes (entry: {})",
            metadata.name,
            self.nodes.len(),
            entry
        );

        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry,
            metadata,
        })
    }

    fn register(&mut self, node: Arc<dyn Node<S>>) -> String {
        let id = node.id().to_string();
        if self.nodes.insert(id.clone(), node).is_some() {
            self.errors.push(GraphError::DuplicateNode(id.clone()));
        } else {
            self.order.push(id.clone());
        }
        id
    }

    fn link(&mut self, from: &str, to: &str) {
        let spec = self
            .edges
            .entry(from.to_string())
            .or_insert_with(EdgeSpec::new);
        if spec.default.is_some() {
            self.errors.push(GraphError::DuplicateEdge(from.to_string()));
        } else {
            spec.default = Some(to.to_string());
        }
    }
}

impl<S: GraphState> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated, immutable graph. Build a new one from a [`GraphBuilder`] to
/// change it.
pub struct CompiledGraph<S: GraphState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, EdgeSpec<S>>,
    entry: String,
    metadata: GraphMetadata,
}

impl<S: GraphState> CompiledGraph<S> {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn metadata(&self) -> &GraphMetadata {
        &self.metadata
    }

    pub fn node(&self, id: &str) -> Option<&Arc<dyn Node<S>>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn edges_from(&self, id: &str) -> Option<&EdgeSpec<S>> {
        self.edges.get(id)
    }

    pub(crate) fn route(&self, from: &str, state: &S) -> Routing {
        let Some(spec) = self.edges.get(from) else {
            return Routing::End;
        };

        let target = spec
            .branches
            .iter()
            .find(|branch| (branch.predicate)(state))
            .map(|branch| branch.target.as_str())
            .or(spec.default.as_deref());

        match target {
            Some(END) => Routing::End,
            Some(next) => Routing::Next(next.to_string()),
            None => Routing::NoMatch,
        }
    }
}

impl<S: GraphState> std::fmt::Debug for CompiledGraph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.node_ids().collect();
        ids.sort_unstable();
        f.debug_struct("CompiledGraph")
            .field("metadata", &self.metadata)
            .field("entry", &self.entry)
            .field("nodes", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::{FnNode, NodeResult},
        state::MapState,
    };

    fn noop(id: &'static str) -> impl Node<MapState> {
        FnNode::new(id, |_: &MapState| Ok(NodeResult::empty()))
    }

    #[test]
    fn test_linear_chain_compiles() {
        let graph = GraphBuilder::new()
            .start(noop("a"))
            .then(noop("b"))
            .then(noop("c"))
            .compile(GraphMetadata::new("linear").with_description("a -> b -> c"))
            .unwrap();

        assert_eq!(graph.entry(), "a");
        assert_eq!(graph.metadata().name, "linear");
        assert!(graph.edges_from("a").unwrap().is_linear());
        assert!(graph.edges_from("c").is_none());
    }

    #[test]
    fn test_missing_entry_is_rejected() {
        let result = GraphBuilder::<MapState>::new().add_node(noop("a")).end();
        assert_eq!(result.unwrap_err(), GraphError::MissingEntry);
    }

    #[test]
    fn test_dangling_edge_names_target() {
        let result = GraphBuilder::new()
            .start(noop("a"))
            .add_edge("a", "ghost")
            .end();

        assert_eq!(
            result.unwrap_err(),
            GraphError::DanglingEdge {
                from: "a".to_string(),
                to: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_unreachable_node_is_rejected() {
        let result = GraphBuilder::new()
            .start(noop("a"))
            .add_node(noop("island"))
            .end();

        assert_eq!(
            result.unwrap_err(),
            GraphError::UnreachableNode("island".to_string())
        );
    }

    #[test]
    fn test_duplicate_node_is_rejected() {
        let result = GraphBuilder::new().start(noop("a")).then(noop("a")).end();
        assert_eq!(result.unwrap_err(), GraphError::DuplicateNode("a".to_string()));
    }

    #[test]
    fn test_second_default_edge_is_rejected() {
        let result = GraphBuilder::new()
            .start(noop("a"))
            .then(noop("b"))
            .add_node(noop("c"))
            .add_edge("a", "c")
            .end();

        assert_eq!(result.unwrap_err(), GraphError::DuplicateEdge("a".to_string()));
    }

    #[test]
    fn test_then_before_start_is_rejected() {
        let result = GraphBuilder::new().then(noop("a")).end();
        assert_eq!(
            result.unwrap_err(),
            GraphError::ThenBeforeStart("a".to_string())
        );
    }

    #[test]
    fn test_conditional_targets_count_for_reachability() {
        let graph = GraphBuilder::new()
            .start(noop("a"))
            .add_node(noop("left"))
            .add_node(noop("right"))
            .add_conditional_edge("a", |s: &MapState| s.get("go_left").is_some(), "left")
            .add_edge("a", "right")
            .add_edge("left", END)
            .end();

        assert!(graph.is_ok());
    }
}
