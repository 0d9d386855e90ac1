//! Agent backend that shells out to a coding-agent CLI.
//!
//! One process per call: the message goes in on stdin, each stdout line comes
//! back as a text chunk. Dropping the stream kills the process.

use std::{
    path::PathBuf,
    process::Stdio,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, Command},
};
use tokio_stream::wrappers::LinesStream;

use crate::agent::{
    AgentBackend, AgentMessage, AgentSession, ContextUsage, ExecutorError, MessageStream,
    SessionConfig,
};

const AGENT_PLACEHOLDER: &str = "{agent}";

/// `[agent]` section of the CLI config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAgentConfig {
    /// Executable to run for every agent call
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments; `{agent}` is replaced by the agent name
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u64,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_program() -> String {
    "claude".to_string()
}

fn default_args() -> Vec<String> {
    vec!["--print".to_string()]
}

fn default_max_context_tokens() -> u64 {
    200_000
}

impl Default for CommandAgentConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            max_context_tokens: default_max_context_tokens(),
            working_dir: None,
        }
    }
}

/// Rough token estimate, four characters per token.
fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[derive(Debug, Clone)]
pub struct CommandBackend {
    config: CommandAgentConfig,
}

impl CommandBackend {
    pub fn new(config: CommandAgentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AgentBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.config.program
    }

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn AgentSession>, ExecutorError> {
        let working_dir = config
            .working_dir
            .or_else(|| self.config.working_dir.clone());
        Ok(Box::new(CommandSession {
            config: self.config.clone(),
            agent: config.agent.unwrap_or_default(),
            working_dir,
            usage: Arc::default(),
        }))
    }
}

#[derive(Debug, Default)]
struct TokenCounts {
    input: u64,
    output: u64,
}

pub struct CommandSession {
    config: CommandAgentConfig,
    agent: String,
    working_dir: Option<PathBuf>,
    usage: Arc<Mutex<TokenCounts>>,
}

impl CommandSession {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.program);
        command
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .args(
                self.config
                    .args
                    .iter()
                    .map(|arg| arg.replace(AGENT_PLACEHOLDER, &self.agent)),
            )
            .env("RALPH_AGENT", &self.agent);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }

    async fn spawn(&self, message: &str) -> Result<Child, ExecutorError> {
        let mut child = self.command().spawn()?;

        // Fed from its own task: an agent that writes before it has read all
        // of stdin would otherwise block on a stdout pipe nobody drains yet.
        // Shutdown closes stdin so the agent sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            let input = message.as_bytes().to_vec();
            let agent = self.agent.clone();
            tokio::spawn(async move {
                let written = async {
                    stdin.write_all(&input).await?;
                    stdin.shutdown().await
                }
                .await;
                if let Err(e) = written {
                    tracing::debug!(agent = %agent, "Agent stdin closed early: {}", e);
                }
            });
        }

        if let Ok(mut usage) = self.usage.lock() {
            usage.input += estimate_tokens(message);
        }
        tracing::debug!(agent = %self.agent, program = %self.config.program, "Spawned agent process");
        Ok(child)
    }
}

#[async_trait]
impl AgentSession for CommandSession {
    async fn send(&self, message: &str) -> Result<AgentMessage, ExecutorError> {
        let mut stream = self.stream(message).await?;
        let mut content = String::new();
        while let Some(msg) = stream.next().await {
            content.push_str(&msg?.content);
        }
        Ok(AgentMessage::text(content))
    }

    async fn stream(&self, message: &str) -> Result<MessageStream, ExecutorError> {
        let mut child = self.spawn(message).await?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::Stream("agent stdout unavailable".to_string()))?;

        let usage = self.usage.clone();
        let lines = LinesStream::new(BufReader::new(stdout).lines()).map(move |line| match line {
            Ok(mut line) => {
                line.push('\n');
                if let Ok(mut usage) = usage.lock() {
                    usage.output += estimate_tokens(&line);
                }
                Ok(AgentMessage::text(line))
            }
            Err(e) => Err(ExecutorError::Stream(e.to_string())),
        });

        // The child lives inside the stream so dropping it kills the process
        let agent = self.agent.clone();
        let exit = futures::stream::once(async move {
            match child.wait().await {
                Ok(status) if status.success() => None,
                Ok(status) => Some(Err(ExecutorError::agent_failed(
                    agent,
                    format!("process exited with {status}"),
                ))),
                Err(e) => Some(Err(ExecutorError::SpawnError(e))),
            }
        })
        .filter_map(futures::future::ready);

        Ok(lines.chain(exit).boxed())
    }

    async fn context_usage(&self) -> Result<ContextUsage, ExecutorError> {
        let usage = self
            .usage
            .lock()
            .map_err(|_| ExecutorError::Stream("usage counter poisoned".to_string()))?;
        Ok(ContextUsage::new(
            usage.input,
            usage.output,
            self.config.max_context_tokens,
        ))
    }
}
