//! Agent session interface
//!
//! Every backend (process-backed CLI, scripted test double, ...) hands out
//! sessions with the same three operations: a single request/response
//! `send`, an incremental `stream`, and a context-usage query.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to spawn agent: {0}")]
    SpawnError(#[from] std::io::Error),
    #[error("Agent '{agent}' failed: {message}")]
    AgentFailed { agent: String, message: String },
    #[error("Agent stream error: {0}")]
    Stream(String),
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
}

impl ExecutorError {
    pub fn agent_failed(agent: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutorError::AgentFailed {
            agent: agent.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    Text,
    ToolUse,
    Thinking,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub role: Role,
}

impl AgentMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.into(),
            role: Role::Assistant,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            content: content.into(),
            role: Role::Assistant,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub max_tokens: u64,
    pub usage_percentage: f64,
}

impl ContextUsage {
    pub fn new(input_tokens: u64, output_tokens: u64, max_tokens: u64) -> Self {
        let usage_percentage = if max_tokens == 0 {
            0.0
        } else {
            (input_tokens + output_tokens) as f64 / max_tokens as f64 * 100.0
        };
        Self {
            input_tokens,
            output_tokens,
            max_tokens,
            usage_percentage,
        }
    }
}

pub type MessageStream = BoxStream<'static, Result<AgentMessage, ExecutorError>>;

#[async_trait]
pub trait AgentSession: Send + Sync {
    async fn send(&self, message: &str) -> Result<AgentMessage, ExecutorError>;

    async fn stream(&self, message: &str) -> Result<MessageStream, ExecutorError>;

    async fn context_usage(&self) -> Result<ContextUsage, ExecutorError>;
}

/// Options for opening a session on a backend.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Named agent definition (planner, implementer, reviewer, ...)
    pub agent: Option<String>,
    pub working_dir: Option<PathBuf>,
}

impl SessionConfig {
    pub fn for_agent(agent: impl Into<String>) -> Self {
        Self {
            agent: Some(agent.into()),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn AgentSession>, ExecutorError>;
}
