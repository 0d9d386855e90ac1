//! Scripted in-memory agent backend for tests.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;

use crate::agent::{
    AgentBackend, AgentMessage, AgentSession, ContextUsage, ExecutorError, MessageStream,
    SessionConfig,
};

/// Side effect run when a reply is handed out
#[derive(Clone)]
pub struct Hook(Arc<dyn Fn() + Send + Sync>);

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook")
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Chunks(Vec<String>),
    Fail(String),
    /// Never yields; only an interrupt gets the caller out
    Hang,
    Delayed(Duration, Box<Reply>),
    Then(Hook, Box<Reply>),
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Reply::Chunks(vec![content.into()])
    }

    pub fn chunks<I, T>(chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Reply::Chunks(chunks.into_iter().map(Into::into).collect())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Reply::Fail(message.into())
    }

    pub fn hang() -> Self {
        Reply::Hang
    }

    pub fn delayed(millis: u64, reply: Reply) -> Self {
        Reply::Delayed(Duration::from_millis(millis), Box::new(reply))
    }

    /// Run `effect` as the agent is called, then answer with `reply`.
    pub fn then(effect: impl Fn() + Send + Sync + 'static, reply: Reply) -> Self {
        Reply::Then(Hook(Arc::new(effect)), Box::new(reply))
    }
}

type Queue = Arc<Mutex<VecDeque<Reply>>>;
type CallLog = Arc<Mutex<Vec<(String, String)>>>;

pub struct ScriptedSession {
    agent: String,
    queue: Queue,
    fallback: Option<Reply>,
    calls: CallLog,
}

impl ScriptedSession {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            agent: "test".to_string(),
            queue: Arc::new(Mutex::new(replies.into())),
            fallback: None,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    fn take_reply(&self, message: &str) -> Option<Reply> {
        self.calls
            .lock()
            .unwrap()
            .push((self.agent.clone(), message.to_string()));
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .map(|mut reply| {
                while let Reply::Then(Hook(effect), inner) = reply {
                    effect();
                    reply = *inner;
                }
                reply
            })
    }

    async fn resolve(&self, reply: Option<Reply>) -> Result<Vec<String>, ExecutorError> {
        let mut reply = match reply {
            Some(reply) => reply,
            None => {
                return Err(ExecutorError::agent_failed(&self.agent, "script exhausted"));
            }
        };
        loop {
            match reply {
                Reply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
                Reply::Then(_, inner) => reply = *inner,
                Reply::Chunks(chunks) => return Ok(chunks),
                Reply::Fail(message) => {
                    return Err(ExecutorError::agent_failed(&self.agent, message));
                }
                Reply::Hang => {
                    futures::future::pending::<()>().await;
                }
            }
        }
    }
}

#[async_trait]
impl AgentSession for ScriptedSession {
    async fn send(&self, message: &str) -> Result<AgentMessage, ExecutorError> {
        let reply = self.take_reply(message);
        let chunks = self.resolve(reply).await?;
        Ok(AgentMessage::text(chunks.concat()))
    }

    async fn stream(&self, message: &str) -> Result<MessageStream, ExecutorError> {
        let reply = self.take_reply(message);
        if matches!(reply, Some(Reply::Hang)) {
            return Ok(futures::stream::pending().boxed());
        }

        let items: Vec<Result<AgentMessage, ExecutorError>> = match self.resolve(reply).await {
            Ok(chunks) => chunks.into_iter().map(|c| Ok(AgentMessage::text(c))).collect(),
            Err(e) => vec![Err(e)],
        };
        Ok(futures::stream::iter(items).boxed())
    }

    async fn context_usage(&self) -> Result<ContextUsage, ExecutorError> {
        Ok(ContextUsage::new(0, 0, 100_000))
    }
}

/// Backend whose agents answer from per-agent reply queues.
#[derive(Default)]
pub struct ScriptedBackend {
    queues: HashMap<String, Queue>,
    fallbacks: HashMap<String, Reply>,
    calls: CallLog,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, agent: &str, replies: Vec<Reply>) -> Self {
        self.queues
            .insert(agent.to_string(), Arc::new(Mutex::new(replies.into())));
        self
    }

    /// Reply used once an agent's queue is empty.
    pub fn with_fallback(mut self, agent: &str, reply: Reply) -> Self {
        self.fallbacks.insert(agent.to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, agent: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(name, _)| name == agent)
            .map(|(_, msg)| msg)
            .collect()
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn AgentSession>, ExecutorError> {
        let agent = config.agent.unwrap_or_else(|| "default".to_string());
        let queue = self.queues.get(&agent).cloned().unwrap_or_default();
        Ok(Box::new(ScriptedSession {
            fallback: self.fallbacks.get(&agent).cloned(),
            agent,
            queue,
            calls: self.calls.clone(),
        }))
    }
}
