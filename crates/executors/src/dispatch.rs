//! Sub-agent dispatch, single and fan-out.

use std::{path::PathBuf, sync::Arc};

use futures::{FutureExt, StreamExt, future::BoxFuture, stream};
use serde::{Deserialize, Serialize};

use crate::{
    agent::{AgentBackend, ExecutorError, SessionConfig},
    interrupt::{Interrupt, stream_and_wait},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentOptions {
    pub agent_name: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl SubagentOptions {
    pub fn new(agent_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            prompt: prompt.into(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentResult {
    pub agent_name: String,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub was_interrupted: bool,
}

impl SubagentResult {
    fn failed(agent_name: &str, error: &ExecutorError) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            success: false,
            output: String::new(),
            error: Some(error.to_string()),
            was_interrupted: false,
        }
    }
}

/// Runs agent invocations against one backend, sharing one interrupt.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn AgentBackend>,
    interrupt: Interrupt,
    /// Upper bound on concurrent invocations; 0 means no bound
    max_parallel: usize,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn AgentBackend>, interrupt: Interrupt) -> Self {
        Self {
            backend,
            interrupt,
            max_parallel: 0,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn backend(&self) -> &Arc<dyn AgentBackend> {
        &self.backend
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Run one invocation to completion (or interruption).
    ///
    /// An interrupted call is `Ok` with `was_interrupted` set and
    /// `success = false`.
    pub async fn spawn_subagent(
        &self,
        options: &SubagentOptions,
    ) -> Result<SubagentResult, ExecutorError> {
        let mut config = SessionConfig::for_agent(&options.agent_name);
        if let Some(dir) = &options.working_dir {
            config = config.with_working_dir(dir.clone());
        }

        let session = self.backend.create_session(config).await?;
        let outcome = stream_and_wait(session.as_ref(), &options.prompt, &self.interrupt).await?;

        tracing::debug!(
            "[DISPATCH] Agent '{}' finished ({} chars{})",
            options.agent_name,
            outcome.content.len(),
            if outcome.was_interrupted { ", interrupted" } else { "" }
        );

        Ok(SubagentResult {
            agent_name: options.agent_name.clone(),
            success: !outcome.was_interrupted,
            output: outcome.content,
            error: None,
            was_interrupted: outcome.was_interrupted,
        })
    }

    /// Run every invocation concurrently. Results come back in input order;
    /// a failure fills only its own slot.
    pub async fn spawn_subagent_parallel(&self, agents: &[SubagentOptions]) -> Vec<SubagentResult> {
        if agents.is_empty() {
            return Vec::new();
        }
        let limit = match self.max_parallel {
            0 => agents.len(),
            n => n,
        };

        tracing::info!(
            "[DISPATCH] Running {} agents (max {} at once)",
            agents.len(),
            limit
        );

        // Each call is boxed; the unboxed closure future is not Send for every lifetime
        let calls: Vec<BoxFuture<'_, SubagentResult>> = agents
            .iter()
            .map(|options| {
                async move {
                    match self.spawn_subagent(options).await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::warn!("[DISPATCH] Agent '{}' failed: {}", options.agent_name, e);
                            SubagentResult::failed(&options.agent_name, &e)
                        }
                    }
                }
                .boxed()
            })
            .collect();

        stream::iter(calls).buffered(limit).collect().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{Reply, ScriptedBackend};

    fn dispatcher(backend: ScriptedBackend) -> Dispatcher {
        Dispatcher::new(Arc::new(backend), Interrupt::new())
    }

    #[tokio::test]
    async fn test_spawn_subagent_returns_output() {
        let d = dispatcher(ScriptedBackend::new().with_script("planner", vec![Reply::text("plan")]));

        let result = d
            .spawn_subagent(&SubagentOptions::new("planner", "go"))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "plan");
        assert_eq!(result.agent_name, "planner");
    }

    #[tokio::test]
    async fn test_spawn_subagent_propagates_failure() {
        let d = dispatcher(ScriptedBackend::new().with_script("planner", vec![Reply::fail("nope")]));

        let err = d
            .spawn_subagent(&SubagentOptions::new("planner", "go"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_parallel_preserves_input_order() {
        let backend = ScriptedBackend::new()
            .with_script("slow", vec![Reply::delayed(80, Reply::text("slow done"))])
            .with_script("medium", vec![Reply::delayed(40, Reply::text("medium done"))])
            .with_script("fast", vec![Reply::text("fast done")]);
        let d = dispatcher(backend);

        let agents = vec![
            SubagentOptions::new("slow", "a"),
            SubagentOptions::new("medium", "b"),
            SubagentOptions::new("fast", "c"),
        ];
        let results = d.spawn_subagent_parallel(&agents).await;

        let names: Vec<&str> = results.iter().map(|r| r.agent_name.as_str()).collect();
        assert_eq!(names, vec!["slow", "medium", "fast"]);
        assert_eq!(results[0].output, "slow done");
        assert_eq!(results[2].output, "fast done");
    }

    #[tokio::test]
    async fn test_parallel_failure_stays_in_its_slot() {
        let backend = ScriptedBackend::new()
            .with_script("a", vec![Reply::delayed(30, Reply::text("ok a"))])
            .with_script("b", vec![Reply::fail("broken")])
            .with_script("c", vec![Reply::text("ok c")]);
        let d = dispatcher(backend);

        let agents = vec![
            SubagentOptions::new("a", "x"),
            SubagentOptions::new("b", "x"),
            SubagentOptions::new("c", "x"),
        ];
        let results = d.spawn_subagent_parallel(&agents).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[1].error.as_deref().unwrap().contains("broken"));
        assert!(results[2].success);
        assert_eq!(results[2].output, "ok c");
    }

    #[tokio::test]
    async fn test_parallel_runs_concurrently() {
        let backend = ScriptedBackend::new()
            .with_script("a", vec![Reply::delayed(100, Reply::text("a"))])
            .with_script("b", vec![Reply::delayed(100, Reply::text("b"))])
            .with_script("c", vec![Reply::delayed(100, Reply::text("c"))]);
        let d = dispatcher(backend);

        let agents: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|n| SubagentOptions::new(n, "x"))
            .collect();

        let started = tokio::time::Instant::now();
        let results = d.spawn_subagent_parallel(&agents).await;
        assert!(results.iter().all(|r| r.success));
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_parallel_interrupt_marks_each_slot() {
        let backend = ScriptedBackend::new()
            .with_script("a", vec![Reply::hang()])
            .with_script("b", vec![Reply::hang()]);
        let d = dispatcher(backend);

        let trigger = d.interrupt().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let results = d
            .spawn_subagent_parallel(&[SubagentOptions::new("a", "x"), SubagentOptions::new("b", "x")])
            .await;
        assert!(results.iter().all(|r| r.was_interrupted && !r.success));
    }
}
