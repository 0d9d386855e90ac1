//! # Graph - typed workflow runner
//!
//! A directed graph of named nodes that threads a typed state record through
//! execution. Nodes return partial updates that are shallow-merged into the
//! running state; edges are either linear successors or ordered predicate
//! branches evaluated against the post-merge state.
//!
//! Graphs are assembled with [`GraphBuilder`] and validated once by
//! [`GraphBuilder::compile`]. A [`CompiledGraph`] is immutable; it can be run
//! to completion with [`CompiledGraph::run`] or stepped node by node through
//! a [`GraphRun`] when the host needs to look at (or adjust) state between
//! steps.

pub mod builder;
pub mod executor;
pub mod node;
pub mod state;

pub use builder::{
    Branch, CompiledGraph, EdgePredicate, EdgeSpec, GraphBuilder, GraphError, GraphMetadata, END,
};
pub use executor::{GraphRun, RunError, StepOutcome};
pub use node::{ExecutionContext, FnNode, Node, NodeError, NodeKind, NodeResult};
pub use state::{BaseState, GraphState, MapState};
