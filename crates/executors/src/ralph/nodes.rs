//! The ralph node set
//!
//! Every node reads the running [`RalphWorkflowState`], works on a local
//! snapshot, checkpoints the session after each state change and hands
//! the changed fields back as a [`RalphUpdate`]. An interrupted agent call
//! pauses the session and halts the graph.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use graph::{ExecutionContext, Node, NodeError, NodeKind, NodeResult};
use serde_json::json;
use workspace_utils::{assets::session_layout, fs as ufs};

use super::{
    completion::{CompletionDetector, StopReason, evaluate_completion},
    config::RalphConfig,
    prompt::RalphPromptBuilder,
    review::{ReviewVerdict, parse_verdict},
    session::{self, LogEntry, SessionStatus},
    state::{RalphUpdate, RalphWorkflowState},
    task::{self, Task, TaskStatus},
};
use crate::dispatch::{Dispatcher, SubagentOptions};

pub mod node_ids {
    pub const INIT_SESSION: &str = "init_session";
    pub const DECOMPOSE: &str = "decompose";
    pub const IMPLEMENT: &str = "implement";
    pub const REVIEW: &str = "review";
    pub const FIX: &str = "fix";
    pub const CHECK_COMPLETION: &str = "check_completion";
}

type NodeOutcome = Result<NodeResult<RalphUpdate>, NodeError>;

/// Per-task confirmation outside yolo mode. Declined tasks stay pending.
#[async_trait]
pub trait TaskGate: Send + Sync {
    async fn approve(&self, task: &Task) -> bool;
}

pub struct ApproveAll;

#[async_trait]
impl TaskGate for ApproveAll {
    async fn approve(&self, _task: &Task) -> bool {
        true
    }
}

/// Collaborators shared by every ralph node
pub struct RalphContext {
    pub dispatcher: Dispatcher,
    pub config: RalphConfig,
    pub prompts: RalphPromptBuilder,
    pub detector: CompletionDetector,
    pub gate: Arc<dyn TaskGate>,
}

impl RalphContext {
    pub fn new(dispatcher: Dispatcher, config: RalphConfig) -> Self {
        let prompts = RalphPromptBuilder::new(&config.completion_marker)
            .system_prefix(config.system_prefix.as_deref());
        let detector = CompletionDetector::new(config.completion_marker.clone());
        let dispatcher = dispatcher.with_max_parallel(config.max_parallel);
        Self {
            dispatcher,
            config,
            prompts,
            detector,
            gate: Arc::new(ApproveAll),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn TaskGate>) -> Self {
        self.gate = gate;
        self
    }
}

fn log_entry(state: &RalphWorkflowState, action: &str) -> LogEntry {
    LogEntry::new(
        action,
        state.iteration,
        state.should_continue,
        state.max_iterations_reached,
    )
}

/// Persist the durable part of `snapshot`.
async fn checkpoint(snapshot: &mut RalphWorkflowState) -> Result<(), NodeError> {
    snapshot.base.touch();
    session::save_session(&snapshot.session_dir, &snapshot.to_session())
        .await
        .map_err(NodeError::from_error)
}

async fn record(state: &RalphWorkflowState, entry: LogEntry) {
    if let Err(e) = session::append_log(&state.session_dir, &entry).await {
        tracing::warn!("[RALPH] Failed to append agent-call log: {}", e);
    }
}

async fn pause(mut snapshot: RalphWorkflowState, node_id: &str) -> NodeOutcome {
    tracing::info!("[RALPH] Interrupted during {}, pausing session", node_id);
    snapshot.session_status = SessionStatus::Paused;
    checkpoint(&mut snapshot).await?;
    record(&snapshot, log_entry(&snapshot, "interrupted").detail(node_id)).await;

    Ok(NodeResult::update(RalphUpdate {
        tasks: Some(snapshot.tasks),
        ..RalphUpdate::paused()
    })
    .halt())
}

/// Creates or reopens the session directory. Never clobbers saved progress.
pub struct InitSessionNode;

#[async_trait]
impl Node<RalphWorkflowState> for InitSessionNode {
    fn id(&self) -> &str {
        node_ids::INIT_SESSION
    }

    async fn execute(&self, ctx: &ExecutionContext<'_, RalphWorkflowState>) -> NodeOutcome {
        let state = ctx.state;
        let dir = &state.session_dir;
        ufs::ensure_dir(&dir.join(session_layout::LOGS_DIR))
            .await
            .map_err(NodeError::from_error)?;

        let mut snapshot = state.clone();
        snapshot.session_status = SessionStatus::Running;

        let existing = session::load_session_if_exists(dir)
            .await
            .map_err(NodeError::from_error)?;
        let resumed = existing.is_some();
        if let Some(existing) = existing {
            // Keep what the directory already holds
            snapshot.tasks = existing.tasks;
            snapshot.iteration = existing.iteration;
            snapshot.max_iterations = existing.max_iterations;
            snapshot.yolo = existing.yolo;
            snapshot.created_at = existing.created_at;
            if snapshot.user_prompt.is_none() {
                snapshot.user_prompt = existing.prompt;
            }
            tracing::info!(
                "[RALPH] Resuming session {} at iteration {} ({} tasks)",
                snapshot.session_id(),
                snapshot.iteration,
                snapshot.tasks.len()
            );
        } else {
            tracing::info!(
                "[RALPH] Starting session {} (yolo: {}, max iterations: {})",
                snapshot.session_id(),
                snapshot.yolo,
                snapshot.max_iterations
            );
        }

        checkpoint(&mut snapshot).await?;
        record(
            &snapshot,
            log_entry(&snapshot, "init_session").detail(if resumed { "resumed" } else { "created" }),
        )
        .await;

        Ok(NodeResult::update(RalphUpdate {
            user_prompt: Some(snapshot.user_prompt),
            yolo: Some(snapshot.yolo),
            max_iterations: Some(snapshot.max_iterations),
            iteration: Some(snapshot.iteration),
            tasks: Some(snapshot.tasks),
            session_status: Some(SessionStatus::Running),
            created_at: Some(snapshot.created_at),
            ..Default::default()
        })
        .with_output(json!({
            "sessionId": state.session_id(),
            "resumed": resumed,
        })))
    }
}

pub struct DecomposeNode {
    ctx: Arc<RalphContext>,
}

impl DecomposeNode {
    pub fn new(ctx: Arc<RalphContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<RalphWorkflowState> for DecomposeNode {
    fn id(&self) -> &str {
        node_ids::DECOMPOSE
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Agent
    }

    async fn execute(&self, ctx: &ExecutionContext<'_, RalphWorkflowState>) -> NodeOutcome {
        let state = ctx.state;
        if !state.tasks.is_empty() {
            tracing::debug!("[RALPH] Task list already populated, skipping decomposition");
            return Ok(NodeResult::update(RalphUpdate {
                plan_invalid: Some(false),
                ..Default::default()
            }));
        }
        let Some(goal) = state.user_prompt.as_deref() else {
            tracing::info!("[RALPH] No prompt to decompose, running free-form");
            return Ok(NodeResult::update(RalphUpdate {
                plan_invalid: Some(false),
                ..Default::default()
            }));
        };

        let config = &self.ctx.config;
        let attempt = state.decompose_attempts + 1;
        let options = SubagentOptions::new(
            &config.planner_agent,
            self.ctx.prompts.build_decompose(goal, attempt),
        );

        let mut snapshot = state.clone();
        let (tasks, failure) = match self.ctx.dispatcher.spawn_subagent(&options).await {
            Ok(result) if result.was_interrupted => return pause(snapshot, self.id()).await,
            Ok(result) => (task::parse_tasks(task::extract_task_json(&result.output)), None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        let plan_invalid = tasks.is_empty();

        snapshot.tasks = tasks;
        snapshot.decompose_attempts = attempt;
        snapshot.plan_invalid = plan_invalid;
        checkpoint(&mut snapshot).await?;

        let detail = match &failure {
            Some(error) => error.clone(),
            None => format!("attempt {}: {} tasks", attempt, snapshot.tasks.len()),
        };
        record(
            &snapshot,
            log_entry(&snapshot, "decompose")
                .agent(&config.planner_agent)
                .success(!plan_invalid)
                .detail(detail),
        )
        .await;

        if plan_invalid {
            if attempt >= config.max_decompose_attempts {
                tracing::warn!(
                    "[RALPH] Planning failed {} times, continuing free-form",
                    attempt
                );
            } else {
                tracing::warn!("[RALPH] Plan rejected (attempt {}), retrying", attempt);
            }
        } else {
            tracing::info!("[RALPH] Planned {} tasks", snapshot.tasks.len());
        }

        Ok(NodeResult::update(RalphUpdate {
            tasks: Some(snapshot.tasks),
            decompose_attempts: Some(attempt),
            plan_invalid: Some(plan_invalid),
            ..Default::default()
        })
        .with_output(json!({ "attempt": attempt, "planInvalid": plan_invalid })))
    }
}

pub struct ImplementNode {
    ctx: Arc<RalphContext>,
}

impl ImplementNode {
    pub fn new(ctx: Arc<RalphContext>) -> Self {
        Self { ctx }
    }

    /// Goal-only iteration.
    async fn run_free_form(&self, mut snapshot: RalphWorkflowState) -> NodeOutcome {
        let agent = &self.ctx.config.implementer_agent;
        let instruction = snapshot.pending_instruction.take();
        let prompt = self.ctx.prompts.build_free_form(
            snapshot.user_prompt.as_deref().unwrap_or_default(),
            snapshot.iteration + 1,
            instruction.as_deref(),
        );

        let output = match self
            .ctx
            .dispatcher
            .spawn_subagent(&SubagentOptions::new(agent, prompt))
            .await
        {
            Ok(result) if result.was_interrupted => return pause(snapshot, self.id()).await,
            Ok(result) => {
                record(&snapshot, log_entry(&snapshot, "implement").agent(agent).success(true)).await;
                Some(result.output)
            }
            Err(e) => {
                tracing::warn!("[RALPH] Free-form iteration failed: {}", e);
                record(
                    &snapshot,
                    log_entry(&snapshot, "implement")
                        .agent(agent)
                        .success(false)
                        .detail(e.to_string()),
                )
                .await;
                None
            }
        };

        Ok(NodeResult::update(RalphUpdate {
            last_agent_output: Some(output),
            pending_instruction: Some(None),
            was_interrupted: Some(false),
            ..Default::default()
        }))
    }
}

#[async_trait]
impl Node<RalphWorkflowState> for ImplementNode {
    fn id(&self) -> &str {
        node_ids::IMPLEMENT
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Agent
    }

    async fn execute(&self, ctx: &ExecutionContext<'_, RalphWorkflowState>) -> NodeOutcome {
        let mut snapshot = ctx.state.clone();
        // Nothing runnable (no plan, or every task done or blocked): work on
        // the goal directly so the agent can still report completion
        if task::eligible_tasks(&snapshot.tasks).is_empty() {
            return self.run_free_form(snapshot).await;
        }

        let agent = self.ctx.config.implementer_agent.clone();
        let mut instruction = snapshot.pending_instruction.take();
        let mut declined: HashSet<String> = HashSet::new();
        let mut last_output = None;

        loop {
            let Some(index) = task::eligible_tasks(&snapshot.tasks)
                .into_iter()
                .find(|t| !declined.contains(&t.id))
                .and_then(|t| snapshot.tasks.iter().position(|c| c.id == t.id))
            else {
                break;
            };
            let current = snapshot.tasks[index].clone();

            if !snapshot.yolo && !self.ctx.gate.approve(&current).await {
                tracing::info!("[RALPH] Task {} declined, leaving it pending", current.id);
                record(&snapshot, log_entry(&snapshot, "task_declined").task(&current.id)).await;
                declined.insert(current.id);
                continue;
            }

            snapshot.tasks[index].status = TaskStatus::InProgress;
            checkpoint(&mut snapshot).await?;
            tracing::info!("[RALPH] {} {}", current.id, current.active_form);

            let prompt = self.ctx.prompts.build_implement(
                &current,
                &snapshot.tasks,
                snapshot.user_prompt.as_deref(),
                instruction.take().as_deref(),
            );
            let result = self
                .ctx
                .dispatcher
                .spawn_subagent(&SubagentOptions::new(&agent, prompt))
                .await;

            let mut marker_seen = false;
            match result {
                Ok(result) if result.was_interrupted => return pause(snapshot, self.id()).await,
                Ok(result) => {
                    snapshot.tasks[index].status = TaskStatus::Completed;
                    marker_seen = self.ctx.detector.is_complete(&result.output);
                    record(
                        &snapshot,
                        log_entry(&snapshot, "implement")
                            .agent(&agent)
                            .task(&current.id)
                            .success(true),
                    )
                    .await;
                    last_output = Some(result.output);
                }
                Err(e) => {
                    tracing::warn!("[RALPH] Task {} failed: {}", current.id, e);
                    snapshot.tasks[index].status = TaskStatus::Error;
                    record(
                        &snapshot,
                        log_entry(&snapshot, "implement")
                            .agent(&agent)
                            .task(&current.id)
                            .success(false)
                            .detail(e.to_string()),
                    )
                    .await;
                }
            }
            checkpoint(&mut snapshot).await?;

            let (done, total) = task::progress(&snapshot.tasks);
            tracing::info!("[RALPH] Progress: {}/{} tasks completed", done, total);

            if marker_seen {
                tracing::info!("[RALPH] Completion marker seen after task {}", current.id);
                break;
            }
        }

        Ok(NodeResult::update(RalphUpdate {
            tasks: Some(snapshot.tasks),
            last_agent_output: Some(last_output),
            pending_instruction: Some(None),
            was_interrupted: Some(false),
            ..Default::default()
        }))
    }
}

pub struct ReviewNode {
    ctx: Arc<RalphContext>,
}

impl ReviewNode {
    pub fn new(ctx: Arc<RalphContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<RalphWorkflowState> for ReviewNode {
    fn id(&self) -> &str {
        node_ids::REVIEW
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Agent
    }

    async fn execute(&self, ctx: &ExecutionContext<'_, RalphWorkflowState>) -> NodeOutcome {
        let state = ctx.state;
        let config = &self.ctx.config;

        let verdict = if config.review_angles.is_empty() {
            ReviewVerdict {
                overall_correct: true,
                summary: "review disabled".to_string(),
                ..Default::default()
            }
        } else {
            let agents: Vec<SubagentOptions> = config
                .review_angles
                .iter()
                .map(|angle| {
                    SubagentOptions::new(
                        &config.reviewer_agent,
                        self.ctx.prompts.build_review(
                            angle,
                            state.user_prompt.as_deref(),
                            &state.tasks,
                        ),
                    )
                })
                .collect();

            let results = self.ctx.dispatcher.spawn_subagent_parallel(&agents).await;
            if results.iter().any(|r| r.was_interrupted) {
                return pause(state.clone(), self.id()).await;
            }

            let mut verdicts = Vec::with_capacity(results.len());
            for (angle, result) in config.review_angles.iter().zip(results) {
                let verdict = if result.success {
                    parse_verdict(&result.output)
                        .unwrap_or_else(|| ReviewVerdict::unavailable("unparseable verdict"))
                } else {
                    ReviewVerdict::unavailable(result.error.unwrap_or_default())
                };
                record(
                    state,
                    log_entry(state, "review")
                        .agent(&config.reviewer_agent)
                        .success(result.success)
                        .detail(format!("{}: {} findings", angle, verdict.findings.len())),
                )
                .await;
                verdicts.push(verdict);
            }
            ReviewVerdict::merge(verdicts)
        };

        tracing::info!(
            "[RALPH] Review: {} findings, overall correct: {}",
            verdict.findings.len(),
            verdict.overall_correct
        );

        let output = json!({
            "findings": verdict.findings.len(),
            "overallCorrect": verdict.overall_correct,
        });
        Ok(NodeResult::update(RalphUpdate {
            review: Some(Some(verdict)),
            ..Default::default()
        })
        .with_output(output))
    }
}

pub struct FixNode {
    ctx: Arc<RalphContext>,
}

impl FixNode {
    pub fn new(ctx: Arc<RalphContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<RalphWorkflowState> for FixNode {
    fn id(&self) -> &str {
        node_ids::FIX
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Agent
    }

    async fn execute(&self, ctx: &ExecutionContext<'_, RalphWorkflowState>) -> NodeOutcome {
        let mut snapshot = ctx.state.clone();
        let findings = snapshot
            .review
            .as_ref()
            .map(|r| r.findings.clone())
            .unwrap_or_default();
        let agent = self.ctx.config.fixer_agent.clone();

        let mut appended = 0;
        for finding in &findings {
            let options = SubagentOptions::new(&agent, self.ctx.prompts.build_fix(finding));
            match self.ctx.dispatcher.spawn_subagent(&options).await {
                Ok(result) if result.was_interrupted => return pause(snapshot, self.id()).await,
                Ok(_) => {
                    record(
                        &snapshot,
                        log_entry(&snapshot, "fix")
                            .agent(&agent)
                            .success(true)
                            .detail(&finding.file),
                    )
                    .await;
                }
                Err(e) => {
                    // Leave it for the implementer as a corrective task
                    let Some(id) = task::next_task_id(&snapshot.tasks) else {
                        tracing::warn!(
                            "[RALPH] Fix for {} failed ({}), no task id left for a corrective task",
                            finding.file,
                            e
                        );
                        record(
                            &snapshot,
                            log_entry(&snapshot, "fix")
                                .agent(&agent)
                                .success(false)
                                .detail(e.to_string()),
                        )
                        .await;
                        continue;
                    };
                    tracing::warn!("[RALPH] Fix for {} failed ({}), queued {}", finding.file, e, id);
                    let mut corrective =
                        Task::new(id, format!("Fix {}: {}", finding.file, finding.description));
                    corrective.active_form = format!("Fixing {}", finding.file);
                    record(
                        &snapshot,
                        log_entry(&snapshot, "fix")
                            .agent(&agent)
                            .task(&corrective.id)
                            .success(false)
                            .detail(e.to_string()),
                    )
                    .await;
                    snapshot.tasks.push(corrective);
                    appended += 1;
                }
            }
        }

        let mut requeued = 0;
        for task in snapshot
            .tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::Error)
        {
            task.status = TaskStatus::Pending;
            requeued += 1;
        }
        checkpoint(&mut snapshot).await?;

        tracing::info!(
            "[RALPH] Fixed {} findings ({} corrective tasks, {} tasks re-queued)",
            findings.len(),
            appended,
            requeued
        );

        Ok(NodeResult::update(RalphUpdate {
            tasks: Some(snapshot.tasks),
            ..Default::default()
        })
        .with_output(json!({ "appended": appended, "requeued": requeued })))
    }
}

pub struct CheckCompletionNode {
    ctx: Arc<RalphContext>,
}

impl CheckCompletionNode {
    pub fn new(ctx: Arc<RalphContext>) -> Self {
        Self { ctx }
    }
}

fn progress_line(yolo: bool, iteration: u32) -> String {
    if yolo {
        format!("Yolo Iteration {iteration}")
    } else {
        format!("Iteration {iteration}")
    }
}

fn stop_line(reason: StopReason, max_iterations: u32) -> String {
    match reason {
        StopReason::MarkerDetected => "Completed: completion marker detected".to_string(),
        StopReason::AllTasksDone => "Completed: all tasks done".to_string(),
        StopReason::MaxIterations => {
            format!("Stopped: max iterations ({max_iterations}) reached")
        }
    }
}

#[async_trait]
impl Node<RalphWorkflowState> for CheckCompletionNode {
    fn id(&self) -> &str {
        node_ids::CHECK_COMPLETION
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Decision
    }

    async fn execute(&self, ctx: &ExecutionContext<'_, RalphWorkflowState>) -> NodeOutcome {
        let state = ctx.state;
        let iteration = state.iteration + 1;
        let detector = &self.ctx.detector;

        let output = state.last_agent_output.as_deref().unwrap_or_default();
        let marker_seen = detector.is_complete(output);
        let all_done = !state.yolo
            && task::all_completed(&state.tasks)
            && state.review.as_ref().is_some_and(ReviewVerdict::is_clean);
        let decision = evaluate_completion(marker_seen, all_done, iteration, state.max_iterations);

        let mut snapshot = state.clone();
        snapshot.iteration = iteration;
        snapshot.yolo_complete = decision.yolo_complete;
        snapshot.should_continue = decision.should_continue;
        snapshot.max_iterations_reached = decision.max_iterations_reached;
        snapshot.session_status = decision.session_status;

        let dir = &snapshot.session_dir;
        let mut lines = vec![progress_line(snapshot.yolo, iteration)];
        if let Some(reason) = decision.reason {
            lines.push(stop_line(reason, snapshot.max_iterations));
        }
        for line in &lines {
            if let Err(e) = session::append_progress(dir, line).await {
                tracing::warn!("[RALPH] Failed to append progress: {}", e);
            }
        }

        let mut entry = log_entry(&snapshot, "check_completion");
        if let Some(reason) = decision.reason {
            entry = entry.detail(reason.to_string());
        }
        record(&snapshot, entry).await;
        checkpoint(&mut snapshot).await?;

        match decision.reason {
            Some(reason) => {
                tracing::info!("[RALPH] Iteration {}: stopping ({})", iteration, reason);
                if let Some(context) = detector.extract_completion_context(output) {
                    tracing::debug!("[RALPH] Completion context:\n{}", context);
                }
            }
            None => tracing::info!("[RALPH] Iteration {} done, continuing", iteration),
        }

        Ok(NodeResult::update(RalphUpdate {
            iteration: Some(iteration),
            yolo_complete: Some(decision.yolo_complete),
            should_continue: Some(decision.should_continue),
            max_iterations_reached: Some(decision.max_iterations_reached),
            session_status: Some(decision.session_status),
            ..Default::default()
        })
        .with_output(json!({
            "iteration": iteration,
            "shouldContinue": decision.should_continue,
            "maxIterationsReached": decision.max_iterations_reached,
            "yoloComplete": decision.yolo_complete,
        })))
    }
}
