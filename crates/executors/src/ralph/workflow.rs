//! Ralph workflow assembly and the host-facing runner
//!
//! `init_session -> decompose -> implement -> review -> [fix] -> check_completion`,
//! looping back to `implement` while the run should continue. Decompose retries
//! itself while the plan is invalid and attempts remain; a session that
//! already has tasks goes from `init_session` straight to `implement`.

use std::{path::PathBuf, sync::Arc};

use graph::{CompiledGraph, END, GraphBuilder, GraphError, GraphMetadata};
use thiserror::Error;
use uuid::Uuid;

use super::{
    nodes::{
        CheckCompletionNode, DecomposeNode, FixNode, ImplementNode, InitSessionNode,
        RalphContext, ReviewNode, node_ids,
    },
    session::{self, LogEntry, SessionError, SessionStatus},
    state::{RalphWorkflowState, RunArgs},
};
use crate::interrupt::Interrupt;

#[derive(Debug, Error)]
pub enum RalphError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Invalid workflow graph: {0}")]
    Graph(#[from] GraphError),
    #[error("Ralph step '{node_id}' failed: {message}")]
    NodeFailed { node_id: String, message: String },
}

pub fn build_ralph_graph(
    ctx: Arc<RalphContext>,
) -> Result<CompiledGraph<RalphWorkflowState>, GraphError> {
    let max_decompose_attempts = ctx.config.max_decompose_attempts;

    GraphBuilder::<RalphWorkflowState>::new()
        .start(InitSessionNode)
        .add_node(DecomposeNode::new(ctx.clone()))
        .add_node(ImplementNode::new(ctx.clone()))
        .add_node(ReviewNode::new(ctx.clone()))
        .add_node(FixNode::new(ctx.clone()))
        .add_node(CheckCompletionNode::new(ctx))
        .add_conditional_edge(
            node_ids::INIT_SESSION,
            |s: &RalphWorkflowState| !s.tasks.is_empty(),
            node_ids::IMPLEMENT,
        )
        .add_edge(node_ids::INIT_SESSION, node_ids::DECOMPOSE)
        .add_conditional_edge(
            node_ids::DECOMPOSE,
            move |s: &RalphWorkflowState| {
                s.plan_invalid && s.decompose_attempts < max_decompose_attempts
            },
            node_ids::DECOMPOSE,
        )
        .add_edge(node_ids::DECOMPOSE, node_ids::IMPLEMENT)
        .add_edge(node_ids::IMPLEMENT, node_ids::REVIEW)
        .add_conditional_edge(
            node_ids::REVIEW,
            |s: &RalphWorkflowState| s.review.as_ref().is_some_and(|r| !r.findings.is_empty()),
            node_ids::FIX,
        )
        .add_edge(node_ids::REVIEW, node_ids::CHECK_COMPLETION)
        .add_edge(node_ids::FIX, node_ids::CHECK_COMPLETION)
        .add_conditional_edge(
            node_ids::CHECK_COMPLETION,
            |s: &RalphWorkflowState| s.should_continue,
            node_ids::IMPLEMENT,
        )
        .add_edge(node_ids::CHECK_COMPLETION, END)
        .compile(
            GraphMetadata::new("ralph")
                .with_description("Decompose, implement, review and fix until complete"),
        )
}

/// Where a paused run picks up: planning if there is no task list yet,
/// implementation otherwise. A populated list is never re-planned.
pub fn resume_entry(state: &RalphWorkflowState) -> &'static str {
    if state.tasks.is_empty() {
        node_ids::DECOMPOSE
    } else {
        node_ids::IMPLEMENT
    }
}

pub struct RalphWorkflow {
    graph: CompiledGraph<RalphWorkflowState>,
    interrupt: Interrupt,
    home: PathBuf,
}

impl RalphWorkflow {
    pub fn new(ctx: RalphContext, home: impl Into<PathBuf>) -> Result<Self, RalphError> {
        let interrupt = ctx.dispatcher.interrupt().clone();
        let graph = build_ralph_graph(Arc::new(ctx))?;
        Ok(Self {
            graph,
            interrupt,
            home: home.into(),
        })
    }

    pub fn graph(&self) -> &CompiledGraph<RalphWorkflowState> {
        &self.graph
    }

    /// Handle for the host's Ctrl+C wiring
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Build the initial state: a fresh session, or the saved one when
    /// `resume_session_id` is set. A malformed id fails before any disk
    /// access; a missing session fails with its id.
    pub async fn prepare(&self, args: &RunArgs) -> Result<RalphWorkflowState, RalphError> {
        let Some(raw_id) = &args.resume_session_id else {
            let id = Uuid::new_v4();
            let dir = session::create_session_directory(&self.home, id).await?;
            return Ok(RalphWorkflowState::new(id, dir, args));
        };

        let id = session::parse_session_id(raw_id)?;
        let dir = session::session_dir(&self.home, id);
        let saved = session::load_session(&dir).await?;

        let mut state = RalphWorkflowState::from_session(&saved);
        state.session_dir = dir;
        // A prompt given on resume steers the next call instead of replacing the goal
        if state.user_prompt.is_some() {
            state.pending_instruction = args.prompt.clone();
        } else {
            state.user_prompt = args.prompt.clone();
        }

        tracing::info!(
            "[RALPH] Loaded session {} (status: {}, iteration {})",
            id,
            saved.status,
            saved.iteration
        );
        Ok(state)
    }

    /// Run from the entry node until completion, the cap, or a pause.
    /// A session that already completed is returned untouched.
    pub async fn run(&self, state: RalphWorkflowState) -> Result<RalphWorkflowState, RalphError> {
        if state.is_completed() {
            tracing::info!(
                "[RALPH] Session {} already completed at iteration {}, nothing to run",
                state.session_id(),
                state.iteration
            );
            return Ok(state);
        }
        self.drive(node_ids::INIT_SESSION, state).await
    }

    /// Continue a paused run, optionally with a follow-up instruction that
    /// the next implementation call receives once.
    pub async fn resume_after_pause(
        &self,
        mut state: RalphWorkflowState,
        instruction: Option<String>,
    ) -> Result<RalphWorkflowState, RalphError> {
        if state.is_completed() {
            return Ok(state);
        }
        self.interrupt.reset();
        state.session_status = SessionStatus::Running;
        state.was_interrupted = false;
        state.pending_instruction = instruction.filter(|i| !i.trim().is_empty());

        let entry = resume_entry(&state);
        tracing::info!("[RALPH] Resuming session {} at {}", state.session_id(), entry);
        self.drive(entry, state).await
    }

    async fn drive(
        &self,
        entry: &str,
        state: RalphWorkflowState,
    ) -> Result<RalphWorkflowState, RalphError> {
        match self.graph.run_from(entry, state).await {
            Ok(state) => Ok(state),
            Err(err) => {
                let node_id = err.node_id().to_string();
                // Nodes checkpoint as they go, so disk is at least as new as the
                // state the engine held before the failing node. Only log it.
                if let Some(failed) = err.state() {
                    let entry = LogEntry::new(
                        "failed",
                        failed.iteration,
                        false,
                        failed.max_iterations_reached,
                    )
                    .detail(format!("{}: {}", node_id, err));
                    if let Err(e) = session::append_log(&failed.session_dir, &entry).await {
                        tracing::warn!("[RALPH] Failed to append agent-call log: {}", e);
                    }
                }
                tracing::error!("[RALPH] Step '{}' failed: {}", node_id, err);
                Err(RalphError::NodeFailed {
                    node_id,
                    message: err.to_string(),
                })
            }
        }
    }
}
