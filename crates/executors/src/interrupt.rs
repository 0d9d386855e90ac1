//! User interruption as a value, not an exception.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;

use crate::agent::{AgentSession, ExecutorError, MessageKind};

/// Clonable, resettable interruption flag shared between the host (Ctrl+C
/// handler) and whatever is currently waiting on an agent.
#[derive(Debug, Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is set (immediately if it already is).
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapsed result of a streamed agent call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    pub content: String,
    pub was_interrupted: bool,
}

/// Stream `message` through `session`, concatenating text chunks, until the
/// stream ends or `interrupt` fires. On interruption the text received so
/// far is returned with `was_interrupted = true` and the stream is dropped.
pub async fn stream_and_wait(
    session: &dyn AgentSession,
    message: &str,
    interrupt: &Interrupt,
) -> Result<StreamOutcome, ExecutorError> {
    let mut outcome = StreamOutcome::default();
    if interrupt.is_triggered() {
        outcome.was_interrupted = true;
        return Ok(outcome);
    }

    let mut stream = session.stream(message).await?;
    loop {
        tokio::select! {
            biased;
            _ = interrupt.triggered() => {
                tracing::debug!("Agent stream interrupted");
                outcome.was_interrupted = true;
                return Ok(outcome);
            }
            item = stream.next() => match item {
                Some(Ok(msg)) => match msg.kind {
                    MessageKind::Text => outcome.content.push_str(&msg.content),
                    MessageKind::Error => return Err(ExecutorError::Stream(msg.content)),
                    MessageKind::ToolUse | MessageKind::Thinking => {}
                },
                Some(Err(e)) => return Err(e),
                None => return Ok(outcome),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{Reply, ScriptedSession};

    #[tokio::test]
    async fn test_collects_text_chunks() {
        let session = ScriptedSession::new(vec![Reply::chunks(["Hello ", "world"])]);
        let interrupt = Interrupt::new();

        let outcome = stream_and_wait(&session, "hi", &interrupt).await.unwrap();
        assert_eq!(outcome.content, "Hello world");
        assert!(!outcome.was_interrupted);
    }

    #[tokio::test]
    async fn test_interrupt_returns_flag_not_error() {
        let session = ScriptedSession::new(vec![Reply::hang()]);
        let interrupt = Interrupt::new();

        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let outcome = stream_and_wait(&session, "hi", &interrupt).await.unwrap();
        assert!(outcome.was_interrupted);
    }

    #[tokio::test]
    async fn test_pre_triggered_interrupt_skips_call() {
        let session = ScriptedSession::new(vec![Reply::text("unused")]);
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let outcome = stream_and_wait(&session, "hi", &interrupt).await.unwrap();
        assert!(outcome.was_interrupted);
        assert_eq!(session.calls().len(), 0);
    }

    #[tokio::test]
    async fn test_reset_clears_flag() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        assert!(interrupt.is_triggered());
        interrupt.reset();
        assert!(!interrupt.is_triggered());
    }

    #[tokio::test]
    async fn test_error_message_surfaces_as_error() {
        let session = ScriptedSession::new(vec![Reply::fail("boom")]);
        let interrupt = Interrupt::new();

        let err = stream_and_wait(&session, "hi", &interrupt).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
