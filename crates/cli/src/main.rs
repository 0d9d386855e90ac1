//! Ralph CLI - autonomous decompose / implement / review / fix loop
//!
//! Hosts the ralph workflow: loads configuration, wires Ctrl+C to the
//! workflow interrupt, prompts for follow-up instructions after a pause, and
//! browses saved sessions and their agent-call logs.

mod commands;
mod config;
mod interactive;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use executors::ralph::RunArgs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workspace_utils::assets;

/// Ralph - iterate with coding agents until the work is done
#[derive(Parser)]
#[command(name = "ralph")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Decompose a goal into tasks and loop implement/review/fix until complete")]
#[command(long_about = r#"
Ralph drives coding agents in a loop: the goal is broken into tasks, each task
is implemented, the result is reviewed from several angles in parallel, and
findings are fixed. The loop stops when an agent prints the completion marker,
when every task is done (outside yolo mode), or at the iteration cap.

Press Ctrl+C during a run to pause it and give a follow-up instruction.

Examples:
  ralph run -p "Add a --json flag to the export command" --yolo
  ralph run -p "Fix the flaky tests" -n 10
  ralph run --resume 6f1c...          # continue a saved session
  ralph sessions                      # list saved sessions
  ralph logs 6f1c...                  # show the agent-call log
  ralph config --get ralph.completion_marker
"#)]
struct Cli {
    /// Directory for config and sessions [default: $RALPH_HOME, then the
    /// platform data directory]
    #[arg(long, global = true)]
    home: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or resume a ralph loop
    Run {
        /// Goal for a new session, or a follow-up instruction when resuming
        #[arg(short, long)]
        prompt: Option<String>,

        /// Run every task without confirmation; stop only on the completion marker
        #[arg(long)]
        yolo: bool,

        /// Iteration cap (0 = unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        max_iterations: u32,

        /// Resume a saved session by ID
        #[arg(long)]
        resume: Option<String>,

        /// Working directory for the agents
        #[arg(short = 'd', long)]
        directory: Option<PathBuf>,
    },

    /// List saved sessions
    Sessions {
        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show the agent-call log of a session
    Logs {
        /// Session ID
        session_id: String,
    },

    /// Configuration management
    Config {
        /// Print one configuration value
        #[arg(long, conflicts_with = "set")]
        get: Option<String>,

        /// Set a configuration value (key=value)
        #[arg(long)]
        set: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "ralph={level},executors={level},graph={level},warn",
                    level = log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let home = match cli.home {
        Some(dir) => assets::resolve_home(Some(dir)),
        None => assets::ralph_home(),
    };
    let config_path = config::Config::config_path(&home);
    let mut config = config::Config::load(&config_path)?;
    let output = output::OutputHandler::new(cli.verbose);

    match cli.command {
        Commands::Run {
            prompt,
            yolo,
            max_iterations,
            resume,
            directory,
        } => {
            let args = RunArgs {
                prompt,
                yolo,
                max_iterations,
                resume_session_id: resume,
            };
            commands::run(&config, &home, args, directory, &output).await?;
        }
        Commands::Sessions { limit } => {
            commands::list_sessions(&home, limit, &output).await?;
        }
        Commands::Logs { session_id } => {
            commands::show_logs(&home, &session_id, &output)?;
        }
        Commands::Config { get, set } => match (get, set) {
            (Some(key), _) => commands::get_config(&config, &key)?,
            (None, Some(kv)) => commands::set_config(&mut config, &config_path, &kv, &output)?,
            (None, None) => commands::show_config(&config, &config_path, &output)?,
        },
    }

    Ok(())
}
