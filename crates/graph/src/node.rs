//! Node abstraction - one named unit of work in a graph

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::{builder::CompiledGraph, state::GraphState};

/// Behaviour category of a node. Informational only; the executor treats
/// every kind the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    /// Calls out to an agent backend
    Agent,
    /// Pure computation over the state
    Compute,
    /// Only decides where to go next
    Decision,
}

/// What a node hands back to the executor.
#[derive(Debug)]
pub struct NodeResult<U> {
    /// Partial update merged into the running state
    pub update: Option<U>,
    /// Value recorded under the node id in `BaseState::outputs`
    pub output: Option<serde_json::Value>,
    /// Explicit successor, overriding the graph's edges
    pub next: Option<String>,
    /// Stop the run after merging, without error
    pub halt: bool,
}

impl<U> NodeResult<U> {
    pub fn empty() -> Self {
        Self {
            update: None,
            output: None,
            next: None,
            halt: false,
        }
    }

    pub fn update(update: U) -> Self {
        Self {
            update: Some(update),
            ..Self::empty()
        }
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn goto(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn halt(mut self) -> Self {
        self.halt = true;
        self
    }
}

impl<U> Default for NodeResult<U> {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Source(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::Failed(message.into())
    }

    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        NodeError::Source(Box::new(error))
    }
}

/// Everything a node can see while executing.
pub struct ExecutionContext<'a, S: GraphState> {
    pub state: &'a S,
    pub graph: &'a CompiledGraph<S>,
    /// Number of nodes executed before this one in the current run
    pub step: u64,
}

#[async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    /// Stable id, unique within a graph
    fn id(&self) -> &str;

    fn kind(&self) -> NodeKind {
        NodeKind::Compute
    }

    async fn execute(&self, ctx: &ExecutionContext<'_, S>) -> Result<NodeResult<S::Update>, NodeError>;
}

/// Node backed by a synchronous closure over the state.
pub struct FnNode<S, F> {
    id: String,
    func: F,
    _state: PhantomData<fn() -> S>,
}

impl<S, F> FnNode<S, F>
where
    S: GraphState,
    F: Fn(&S) -> Result<NodeResult<S::Update>, NodeError> + Send + Sync,
{
    pub fn new(id: impl Into<String>, func: F) -> Self {
        Self {
            id: id.into(),
            func,
            _state: PhantomData,
        }
    }
}

#[async_trait]
impl<S, F> Node<S> for FnNode<S, F>
where
    S: GraphState,
    F: Fn(&S) -> Result<NodeResult<S::Update>, NodeError> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &ExecutionContext<'_, S>) -> Result<NodeResult<S::Update>, NodeError> {
        (self.func)(ctx.state)
    }
}
