//! Graph executor - drives a compiled graph from its entry node to a terminal

use crate::{
    builder::{CompiledGraph, Routing, END},
    node::{ExecutionContext, NodeError},
    state::GraphState,
};

/// Failure while running a graph. Carries the state as it was when the
/// failure happened so callers can report it.
#[derive(Debug, thiserror::Error)]
pub enum RunError<S: GraphState> {
    #[error("node '{node_id}' failed: {source}")]
    NodeFailed {
        node_id: String,
        state: Box<S>,
        source: NodeError,
    },

    #[error("node '{node_id}' has no matching outgoing edge")]
    NoMatchingEdge { node_id: String, state: Box<S> },

    #[error("node '{node_id}' routed to unknown node '{target}'")]
    UnknownSuccessor {
        node_id: String,
        target: String,
        state: Box<S>,
    },

    #[error("cannot start at unknown node '{0}'")]
    UnknownStart(String),
}

impl<S: GraphState> RunError<S> {
    pub fn node_id(&self) -> &str {
        match self {
            RunError::NodeFailed { node_id, .. }
            | RunError::NoMatchingEdge { node_id, .. }
            | RunError::UnknownSuccessor { node_id, .. }
            | RunError::UnknownStart(node_id) => node_id,
        }
    }

    /// State at the time of failure, when one exists.
    pub fn state(&self) -> Option<&S> {
        match self {
            RunError::NodeFailed { state, .. }
            | RunError::NoMatchingEdge { state, .. }
            | RunError::UnknownSuccessor { state, .. } => Some(&**state),
            RunError::UnknownStart(_) => None,
        }
    }
}

/// Result of executing a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// `executed` ran; `next` is queued
    Continue { executed: String, next: String },
    /// `executed` asked the run to stop
    Halted { executed: String },
    /// No successor after `executed`, or nothing left to run
    Finished { executed: Option<String> },
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        !matches!(self, StepOutcome::Continue { .. })
    }
}

/// An in-flight run over a compiled graph. Owns the state between steps so
/// hosts can inspect or adjust it before the next node executes.
pub struct GraphRun<'g, S: GraphState> {
    graph: &'g CompiledGraph<S>,
    state: S,
    current: Option<String>,
    steps: u64,
}

impl<'g, S: GraphState> GraphRun<'g, S> {
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Node that the next call to [`GraphRun::step`] will execute.
    pub fn current_node(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_none()
    }

    pub async fn step(&mut self) -> Result<StepOutcome, RunError<S>> {
        let Some(node_id) = self.current.clone() else {
            return Ok(StepOutcome::Finished { executed: None });
        };
        let graph = self.graph;
        let Some(node) = graph.node(&node_id) else {
            self.current = None;
            return Err(RunError::UnknownStart(node_id));
        };

        tracing::debug!(node = %node_id, kind = %node.kind(), step = self.steps, "[GRAPH] Executing node");

        let result = {
            let ctx = ExecutionContext {
                state: &self.state,
                graph,
                step: self.steps,
            };
            node.execute(&ctx).await
        };
        self.steps += 1;

        let result = match result {
            Ok(result) => result,
            Err(source) => {
                tracing::error!(node = %node_id, "[GRAPH] Node failed: {}", source);
                self.current = None;
                return Err(RunError::NodeFailed {
                    node_id,
                    state: Box::new(self.state.clone()),
                    source,
                });
            }
        };

        let mutated = result.update.is_some() || result.output.is_some();
        if let Some(update) = result.update {
            self.state.merge(update);
        }
        if let Some(output) = result.output {
            self.state.base_mut().record_output(&node_id, output);
        }
        if mutated {
            self.state.base_mut().touch();
        }

        if result.halt {
            tracing::debug!(node = %node_id, "[GRAPH] Halt requested");
            self.current = None;
            return Ok(StepOutcome::Halted { executed: node_id });
        }

        let next = match result.next {
            Some(target) if target == END => None,
            Some(target) => {
                if !graph.contains(&target) {
                    self.current = None;
                    return Err(RunError::UnknownSuccessor {
                        node_id,
                        target,
                        state: Box::new(self.state.clone()),
                    });
                }
                Some(target)
            }
            None => match graph.route(&node_id, &self.state) {
                Routing::Next(target) => Some(target),
                Routing::End => None,
                Routing::NoMatch => {
                    self.current = None;
                    return Err(RunError::NoMatchingEdge {
                        node_id,
                        state: Box::new(self.state.clone()),
                    });
                }
            },
        };

        self.current = next.clone();
        Ok(match next {
            Some(next) => StepOutcome::Continue {
                executed: node_id,
                next,
            },
            None => StepOutcome::Finished {
                executed: Some(node_id),
            },
        })
    }

    /// Step until the graph finishes or a node halts.
    pub async fn run_to_end(mut self) -> Result<S, RunError<S>> {
        while !self.step().await?.is_done() {}
        Ok(self.state)
    }
}

impl<S: GraphState> CompiledGraph<S> {
    /// Begin a step-wise run at the entry node.
    pub fn start(&self, initial: S) -> GraphRun<'_, S> {
        GraphRun {
            graph: self,
            state: initial,
            current: Some(self.entry().to_string()),
            steps: 0,
        }
    }

    /// Begin a step-wise run at an arbitrary node, e.g. when resuming.
    pub fn start_at(&self, node_id: &str, initial: S) -> Result<GraphRun<'_, S>, RunError<S>> {
        if !self.contains(node_id) {
            return Err(RunError::UnknownStart(node_id.to_string()));
        }
        Ok(GraphRun {
            graph: self,
            state: initial,
            current: Some(node_id.to_string()),
            steps: 0,
        })
    }

    pub async fn run(&self, initial: S) -> Result<S, RunError<S>> {
        tracing::info!("[GRAPH] Running graph '{}'", self.metadata().name);
        self.start(initial).run_to_end().await
    }

    pub async fn run_from(&self, node_id: &str, initial: S) -> Result<S, RunError<S>> {
        tracing::info!(
            "[GRAPH] Running graph '{}' from node '{}'",
            self.metadata().name,
            node_id
        );
        self.start_at(node_id, initial)?.run_to_end().await
    }
}
