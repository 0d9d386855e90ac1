//! CLI subcommand handlers

use std::{
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use colored::Colorize;
use executors::{
    command::CommandBackend,
    dispatch::Dispatcher,
    interrupt::Interrupt,
    ralph::{session, LogEntry, RalphContext, RalphWorkflow, RunArgs},
};
use workspace_utils::assets::session_layout;

use crate::{
    config::Config,
    interactive::{self, ConfirmGate},
    output::OutputHandler,
};

/// Run (or resume) a ralph loop until it completes, hits the cap, or the
/// user stops it after an interrupt.
pub async fn run(
    config: &Config,
    home: &Path,
    args: RunArgs,
    directory: Option<PathBuf>,
    output: &OutputHandler,
) -> Result<()> {
    let mut agent = config.agent.clone();
    if directory.is_some() {
        agent.working_dir = directory;
    }

    let dispatcher = Dispatcher::new(Arc::new(CommandBackend::new(agent)), Interrupt::new());
    // Only consulted when the (possibly resumed) session is not in yolo mode
    let ctx = RalphContext::new(dispatcher, config.ralph.clone()).with_gate(Arc::new(ConfirmGate));
    let workflow = RalphWorkflow::new(ctx, home)?;

    let interrupt = workflow.interrupt().clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[RALPH] Interrupt requested");
            interrupt.trigger();
        }
    });

    let mut state = workflow.prepare(&args).await?;
    output.print_banner(&state);
    state = workflow.run(state).await?;

    while state.is_paused() {
        output.print_warning(&format!(
            "Interrupted at iteration {}. Session saved.",
            state.iteration
        ));
        let answer = interactive::ask(format!(
            "{} ",
            "Follow-up instruction (Enter to continue, Ctrl+D to stop) >".bright_cyan()
        ))
        .await?;

        let Some(instruction) = answer else {
            output.print_info(&format!(
                "Resume later with: ralph run --resume {}",
                state.session_id()
            ));
            return Ok(());
        };
        state = workflow.resume_after_pause(state, Some(instruction)).await?;
    }

    output.print_run_report(&state);
    Ok(())
}

/// List saved sessions, most recent first
pub async fn list_sessions(home: &Path, limit: usize, output: &OutputHandler) -> Result<()> {
    output.print_header("Sessions");

    let sessions = session::list_sessions(home).await?;
    if sessions.is_empty() {
        output.print_info("No sessions found.");
        return Ok(());
    }

    let shown = &sessions[..limit.min(sessions.len())];
    output.print_sessions_table(shown);
    if sessions.len() > shown.len() {
        output.print_info(&format!("{} more not shown", sessions.len() - shown.len()));
    }
    Ok(())
}

/// Render a session's agent-call log, one coloured line per event
pub fn show_logs(home: &Path, session_id: &str, output: &OutputHandler) -> Result<()> {
    let id = session::parse_session_id(session_id)?;
    let path = session::session_dir(home, id)
        .join(session_layout::LOGS_DIR)
        .join(session_layout::AGENT_CALLS_FILE);
    if !path.exists() {
        anyhow::bail!("No agent-call log for session {}", id);
    }

    let file =
        std::fs::File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
    let entries = read_log_entries(BufReader::new(file))?;

    output.print_header(&format!("Agent calls for {}", id));
    for entry in &entries {
        output.print_log_entry(entry);
    }
    println!();
    output.print_info(&format!("{} events", entries.len()));
    Ok(())
}

/// Parse JSONL log lines, skipping blank or malformed ones
fn read_log_entries(reader: impl BufRead) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("Skipping log line {}: {}", number + 1, e),
        }
    }
    Ok(entries)
}

/// Show the current configuration
pub fn show_config(config: &Config, path: &Path, output: &OutputHandler) -> Result<()> {
    output.print_header("Configuration");
    println!("  {} {}", "File:".dimmed(), path.display());
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Print one configuration value
pub fn get_config(config: &Config, key: &str) -> Result<()> {
    let Some(value) = config.get(key.trim()) else {
        anyhow::bail!("Unknown or unset key '{}'", key.trim());
    };
    println!("{}", value);
    Ok(())
}

/// Set a configuration value (`key=value`) and save
pub fn set_config(config: &mut Config, path: &Path, kv: &str, output: &OutputHandler) -> Result<()> {
    let Some((key, value)) = kv.split_once('=') else {
        anyhow::bail!("Expected key=value, got '{}'", kv);
    };
    config.set(key.trim(), value.trim())?;
    config.save(path)?;
    output.print_success(&format!("Set {} = {}", key.trim(), value.trim()));
    Ok(())
}
