//! Output formatting and terminal rendering
//!
//! Handles coloured terminal output: banners, task and session tables, the
//! agent-call log viewer and the end-of-run report.

use colored::{ColoredString, Colorize};
use executors::ralph::{
    LogEntry, RalphSession, RalphWorkflowState, SessionStatus, Task, TaskStatus, task,
};

/// Truncate to `max` characters, marking the cut with "..."
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}

fn status_colored(status: TaskStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        TaskStatus::Pending => label.bright_yellow(),
        TaskStatus::InProgress => label.bright_blue(),
        TaskStatus::Completed => label.bright_green(),
        TaskStatus::Error => label.bright_red(),
    }
}

fn session_status_colored(status: SessionStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        SessionStatus::Running => label.bright_blue(),
        SessionStatus::Paused => label.bright_yellow(),
        SessionStatus::Completed => label.bright_green(),
    }
}

fn action_colored(action: &str) -> ColoredString {
    let label = format!("{:<16}", action);
    match action {
        "init_session" => label.bright_cyan(),
        "decompose" => label.bright_magenta(),
        "implement" => label.bright_blue(),
        "review" => label.bright_yellow(),
        "fix" => label.yellow(),
        "check_completion" => label.bright_green(),
        "interrupted" | "task_declined" | "failed" => label.bright_red(),
        _ => label.normal(),
    }
}

/// One line of the agent-call log viewer
pub fn format_log_entry(entry: &LogEntry) -> String {
    let mut line = format!(
        "{} {} {}",
        entry.timestamp.format("%H:%M:%S").to_string().dimmed(),
        format!("it {:>3}", entry.iteration).dimmed(),
        action_colored(&entry.action),
    );

    if let Some(agent) = &entry.agent {
        line.push_str(&format!(" {}", agent.bright_white()));
    }
    if let Some(task_id) = &entry.task_id {
        line.push_str(&format!(" {}", task_id.bright_cyan()));
    }
    match entry.success {
        Some(true) => line.push_str(&format!(" {}", "✓".bright_green())),
        Some(false) => line.push_str(&format!(" {}", "✗".bright_red())),
        None => {}
    }
    if let Some(detail) = &entry.detail {
        line.push_str(&format!(" {}", truncate(detail, 80).dimmed()));
    }
    if !entry.should_continue {
        let reason = if entry.max_iterations_reached {
            "[cap reached]"
        } else {
            "[stop]"
        };
        line.push_str(&format!(" {}", reason.bright_red().bold()));
    }

    line
}

/// Output handler for terminal display
pub struct OutputHandler {
    pub show_agent_output: bool,
}

impl OutputHandler {
    pub fn new(show_agent_output: bool) -> Self {
        Self { show_agent_output }
    }

    /// Print the run banner
    pub fn print_banner(&self, state: &RalphWorkflowState) {
        let session_id = state.session_id().to_string();
        let goal = state.user_prompt.as_deref().unwrap_or("(no prompt)");
        let cap = if state.max_iterations == 0 {
            "unlimited".to_string()
        } else {
            state.max_iterations.to_string()
        };

        println!();
        println!(
            "{}",
            "╔═══════════════════════════════════════════════════════════════╗".bright_cyan()
        );
        println!(
            "{}",
            "║             Ralph Loop                                        ║".bright_cyan()
        );
        println!(
            "{}",
            "╚═══════════════════════════════════════════════════════════════╝".bright_cyan()
        );
        println!("  {} {}", "Session:".dimmed(), session_id.bright_white());
        println!("  {} {}", "Goal:".dimmed(), truncate(goal, 70));
        println!(
            "  {} {}   {} {}   {} {}",
            "Mode:".dimmed(),
            if state.yolo { "yolo".bright_magenta() } else { "confirm".normal() },
            "Iteration:".dimmed(),
            state.iteration,
            "Max:".dimmed(),
            cap
        );
        println!();
    }

    /// Print a section header
    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", format!("▶ {}", text).bright_yellow().bold());
        println!("{}", "─".repeat(60).dimmed());
    }

    /// Print a success message
    pub fn print_success(&self, text: &str) {
        println!("{} {}", "✓".bright_green(), text.bright_white());
    }

    /// Print an error message
    pub fn print_error(&self, text: &str) {
        eprintln!("{} {}", "✗".bright_red(), text.bright_red());
    }

    /// Print a warning message
    pub fn print_warning(&self, text: &str) {
        println!("{} {}", "⚠".bright_yellow(), text.yellow());
    }

    /// Print an info message
    pub fn print_info(&self, text: &str) {
        println!("{} {}", "ℹ".bright_blue(), text);
    }

    /// Print tasks table
    pub fn print_tasks_table(&self, tasks: &[Task]) {
        if tasks.is_empty() {
            self.print_info("No tasks.");
            return;
        }

        println!();
        println!(
            "{}",
            format!("{:<6} {:<50} {:>12} {:<12}", "ID", "Task", "Status", "Blocked by")
                .bright_white()
                .bold()
        );
        println!("{}", "─".repeat(84).dimmed());

        for t in tasks {
            println!(
                "{:<6} {:<50} {:>12} {:<12}",
                t.id.bright_cyan(),
                truncate(&t.content, 48),
                status_colored(t.status),
                t.blocked_by.join(",").dimmed()
            );
        }
        println!();
    }

    /// Print sessions table
    pub fn print_sessions_table(&self, sessions: &[RalphSession]) {
        println!();
        println!(
            "{}",
            format!(
                "{:<36} {:<10} {:>9} {:>7} {:<17} {}",
                "ID", "Status", "Iteration", "Tasks", "Updated", "Goal"
            )
            .bright_white()
            .bold()
        );
        println!("{}", "─".repeat(110).dimmed());

        for s in sessions {
            let (done, total) = task::progress(&s.tasks);
            println!(
                "{:<36} {:<10} {:>9} {:>7} {:<17} {}",
                s.session_id.to_string().dimmed(),
                session_status_colored(s.status),
                s.iteration,
                format!("{}/{}", done, total),
                s.updated_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                truncate(s.prompt.as_deref().unwrap_or("-"), 30)
            );
        }
        println!();
    }

    pub fn print_log_entry(&self, entry: &LogEntry) {
        println!("{}", format_log_entry(entry));
    }

    /// Print the end-of-run report
    pub fn print_run_report(&self, state: &RalphWorkflowState) {
        let (done, total) = task::progress(&state.tasks);
        let outcome = if state.yolo_complete {
            "completion marker detected".bright_green()
        } else if state.max_iterations_reached {
            format!("max iterations ({}) reached", state.max_iterations).bright_yellow()
        } else if state.is_completed() {
            "all tasks done".bright_green()
        } else {
            state.session_status.to_string().normal()
        };

        self.print_header(&format!(
            "Session {} finished",
            short_id(&state.session_id().to_string())
        ));
        println!("  {} {}", "Outcome:".dimmed(), outcome);
        println!("  {} {}", "Iterations:".dimmed(), state.iteration);
        println!("  {} {}/{}", "Tasks:".dimmed(), done, total);
        println!("  {} {}", "Directory:".dimmed(), state.session_dir.display());

        self.print_tasks_table(&state.tasks);

        if self.show_agent_output {
            if let Some(output) = &state.last_agent_output {
                self.print_header("Last agent output");
                println!("{}", output);
            }
        }
    }
}
