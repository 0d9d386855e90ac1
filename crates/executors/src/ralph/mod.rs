//! Ralph Wiggum Loop Execution Module
//!
//! Implements the Ralph Wiggum methodology for autonomous, iterative task execution
//! on top of the graph engine.
//!
//! Key concepts:
//! - Decompose the goal into a validated `#N` task list
//! - Implement, review (in parallel, from several angles) and fix, once per iteration
//! - Stop on the completion marker or the iteration cap, whichever comes first
//! - Persist after every state change so a session can be resumed by id

pub mod completion;
pub mod config;
pub mod nodes;
pub mod prompt;
pub mod review;
pub mod session;
pub mod state;
pub mod task;
pub mod workflow;


pub use completion::{
    CompletionDecision, CompletionDetector, StopReason, evaluate_completion,
    max_iterations_reached,
};
pub use config::RalphConfig;
pub use nodes::{ApproveAll, RalphContext, TaskGate, node_ids};
pub use prompt::RalphPromptBuilder;
pub use review::{Finding, ReviewVerdict};
pub use session::{LogEntry, RalphSession, SessionError, SessionStatus};
pub use state::{RalphUpdate, RalphWorkflowState, RunArgs};
pub use task::{Task, TaskStatus, parse_tasks};
pub use workflow::{RalphError, RalphWorkflow, build_ralph_graph, resume_entry};
