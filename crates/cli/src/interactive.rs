//! Line input for the run loop: follow-up instructions after an interrupt and
//! per-task confirmation outside yolo mode.

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use executors::ralph::{Task, TaskGate};
use rustyline::{error::ReadlineError, history::DefaultHistory, Editor};

/// Read one line. `None` when the user pressed Ctrl+C or Ctrl+D.
pub fn read_line(prompt: &str) -> Result<Option<String>> {
    let mut editor: Editor<(), DefaultHistory> = Editor::new()?;
    match editor.readline(prompt) {
        Ok(line) => Ok(Some(line.trim().to_string())),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// [`read_line`] off the async runtime
pub async fn ask(prompt: String) -> Result<Option<String>> {
    tokio::task::spawn_blocking(move || read_line(&prompt)).await?
}

/// Empty input accepts the default (yes).
pub fn parse_confirmation(answer: &str) -> bool {
    matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "" | "y" | "yes"
    )
}

/// Asks before every task; anything but yes leaves the task pending.
pub struct ConfirmGate;

#[async_trait]
impl TaskGate for ConfirmGate {
    async fn approve(&self, task: &Task) -> bool {
        let prompt = format!(
            "{} {} {} [Y/n] ",
            "Run".bright_yellow(),
            task.id.bright_cyan(),
            task.content
        );
        match ask(prompt).await {
            Ok(Some(answer)) => parse_confirmation(&answer),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("[RALPH] Could not read confirmation: {}", e);
                false
            }
        }
    }
}
