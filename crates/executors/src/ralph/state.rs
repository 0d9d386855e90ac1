//! In-memory ralph state and its reconciliation with the session record.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use graph::{BaseState, GraphState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    completion::max_iterations_reached,
    review::ReviewVerdict,
    session::{RalphSession, SessionStatus},
    task::Task,
};

/// Arguments the host passes in for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    pub prompt: Option<String>,
    pub yolo: bool,
    /// 0 = unlimited
    pub max_iterations: u32,
    /// Raw id as typed by the user; validated before any disk access
    pub resume_session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RalphWorkflowState {
    #[serde(flatten)]
    pub base: BaseState,
    pub session_dir: PathBuf,
    pub user_prompt: Option<String>,
    pub yolo: bool,
    pub max_iterations: u32,
    pub iteration: u32,
    pub tasks: Vec<Task>,
    pub session_status: SessionStatus,
    pub created_at: DateTime<Utc>,

    pub plan_invalid: bool,
    pub decompose_attempts: u32,
    /// Latest implementer output, scanned for the completion marker
    pub last_agent_output: Option<String>,
    pub review: Option<ReviewVerdict>,
    pub yolo_complete: bool,
    pub should_continue: bool,
    pub max_iterations_reached: bool,
    /// Follow-up from the user after an interruption, used once
    pub pending_instruction: Option<String>,
    pub was_interrupted: bool,
}

impl RalphWorkflowState {
    pub fn new(session_id: Uuid, session_dir: PathBuf, args: &RunArgs) -> Self {
        Self {
            base: BaseState::with_execution_id(session_id),
            session_dir,
            user_prompt: args.prompt.clone(),
            yolo: args.yolo,
            max_iterations: args.max_iterations,
            iteration: 0,
            tasks: Vec::new(),
            session_status: SessionStatus::Running,
            created_at: Utc::now(),
            plan_invalid: false,
            decompose_attempts: 0,
            last_agent_output: None,
            review: None,
            yolo_complete: false,
            should_continue: true,
            max_iterations_reached: false,
            pending_instruction: None,
            was_interrupted: false,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.base.execution_id()
    }

    /// Rebuild the working state from a saved record. A paused or running
    /// session comes back as `running`; a completed one stays terminal.
    pub fn from_session(session: &RalphSession) -> Self {
        let mut state = Self::new(
            session.session_id,
            session.session_dir.clone(),
            &RunArgs {
                prompt: session.prompt.clone(),
                yolo: session.yolo,
                max_iterations: session.max_iterations,
                resume_session_id: None,
            },
        );
        state.iteration = session.iteration;
        state.tasks = session.tasks.clone();
        state.created_at = session.created_at;
        if session.status == SessionStatus::Completed {
            state.session_status = SessionStatus::Completed;
            state.should_continue = false;
            state.max_iterations_reached =
                max_iterations_reached(session.max_iterations, session.iteration);
        }
        state
    }

    /// Project the durable fields into a session record.
    pub fn to_session(&self) -> RalphSession {
        RalphSession {
            session_id: self.session_id(),
            session_dir: self.session_dir.clone(),
            prompt: self.user_prompt.clone(),
            tasks: self.tasks.clone(),
            status: self.session_status,
            iteration: self.iteration,
            max_iterations: self.max_iterations,
            yolo: self.yolo,
            created_at: self.created_at,
            updated_at: self.base.last_updated,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.session_status == SessionStatus::Paused
    }

    pub fn is_completed(&self) -> bool {
        self.session_status == SessionStatus::Completed
    }
}

/// Partial update; `None` leaves a field alone. For optional fields the
/// inner `Option` is the new value, so `Some(None)` clears.
#[derive(Debug, Clone, Default)]
pub struct RalphUpdate {
    pub user_prompt: Option<Option<String>>,
    pub yolo: Option<bool>,
    pub max_iterations: Option<u32>,
    pub iteration: Option<u32>,
    pub tasks: Option<Vec<Task>>,
    pub session_status: Option<SessionStatus>,
    pub created_at: Option<DateTime<Utc>>,
    pub plan_invalid: Option<bool>,
    pub decompose_attempts: Option<u32>,
    pub last_agent_output: Option<Option<String>>,
    pub review: Option<Option<ReviewVerdict>>,
    pub yolo_complete: Option<bool>,
    pub should_continue: Option<bool>,
    pub max_iterations_reached: Option<bool>,
    pub pending_instruction: Option<Option<String>>,
    pub was_interrupted: Option<bool>,
}

impl RalphUpdate {
    /// Update for an interrupted agent call.
    pub fn paused() -> Self {
        Self {
            session_status: Some(SessionStatus::Paused),
            was_interrupted: Some(true),
            ..Default::default()
        }
    }
}

impl GraphState for RalphWorkflowState {
    type Update = RalphUpdate;

    fn base(&self) -> &BaseState {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseState {
        &mut self.base
    }

    fn merge(&mut self, update: RalphUpdate) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = update.$field {
                    self.$field = value;
                })*
            };
        }
        take!(
            user_prompt,
            yolo,
            max_iterations,
            iteration,
            tasks,
            session_status,
            created_at,
            plan_invalid,
            decompose_attempts,
            last_agent_output,
            review,
            yolo_complete,
            should_continue,
            max_iterations_reached,
            pending_instruction,
            was_interrupted,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ralph::task::TaskStatus;

    fn state() -> RalphWorkflowState {
        RalphWorkflowState::new(
            Uuid::new_v4(),
            PathBuf::from("/tmp/s"),
            &RunArgs {
                prompt: Some("goal".to_string()),
                yolo: true,
                max_iterations: 10,
                resume_session_id: None,
            },
        )
    }

    #[test]
    fn test_merge_leaves_absent_fields() {
        let mut s = state();
        s.iteration = 4;
        s.merge(RalphUpdate {
            tasks: Some(vec![Task::new("#1", "a")]),
            ..Default::default()
        });
        assert_eq!(s.iteration, 4);
        assert_eq!(s.tasks.len(), 1);
        assert_eq!(s.user_prompt.as_deref(), Some("goal"));
    }

    #[test]
    fn test_merge_can_clear_optional_fields() {
        let mut s = state();
        s.pending_instruction = Some("focus on tests".to_string());
        s.merge(RalphUpdate {
            pending_instruction: Some(None),
            ..Default::default()
        });
        assert_eq!(s.pending_instruction, None);
    }

    #[test]
    fn test_session_projection_round_trip() {
        let mut s = state();
        s.iteration = 3;
        s.session_status = SessionStatus::Paused;
        s.tasks = vec![Task::new("#1", "a").with_status(TaskStatus::Completed)];

        let session = s.to_session();
        assert_eq!(session.session_id, s.session_id());
        assert_eq!(session.iteration, 3);
        assert_eq!(session.max_iterations, 10);
        assert!(session.yolo);

        let restored = RalphWorkflowState::from_session(&session);
        assert_eq!(restored.session_id(), s.session_id());
        assert_eq!(restored.iteration, 3);
        assert_eq!(restored.tasks, s.tasks);
        assert_eq!(restored.user_prompt, s.user_prompt);
        assert_eq!(restored.session_status, SessionStatus::Running);
        assert!(restored.should_continue);
    }

    #[test]
    fn test_completed_session_stays_terminal() {
        let mut s = state();
        s.iteration = 10;
        s.session_status = SessionStatus::Completed;

        let restored = RalphWorkflowState::from_session(&s.to_session());
        assert!(restored.is_completed());
        assert!(!restored.should_continue);
        assert!(restored.max_iterations_reached);
    }
}
