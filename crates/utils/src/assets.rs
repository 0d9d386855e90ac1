use std::{
    env,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;

const RALPH_HOME_ENV: &str = "RALPH_HOME";

/// Layout of a single session directory
/// ```text
/// <ralph home>/sessions/<uuid>/
/// ├── session.json             # durable session record
/// ├── tasks.json               # current task list
/// ├── progress.txt             # one line per iteration
/// └── logs/
///     └── agent-calls.jsonl    # one JSON object per agent call
/// ```
pub mod session_layout {
    pub const SESSIONS_DIR: &str = "sessions";
    pub const SESSION_FILE: &str = "session.json";
    pub const TASKS_FILE: &str = "tasks.json";
    pub const PROGRESS_FILE: &str = "progress.txt";
    pub const LOGS_DIR: &str = "logs";
    pub const AGENT_CALLS_FILE: &str = "agent-calls.jsonl";
    pub const CONFIG_FILE: &str = "config.toml";
}

/// Root directory for config and sessions.
///
/// `RALPH_HOME` wins when set; otherwise the platform data directory
/// (`~/.local/share/ralph` on Linux), falling back to `./.ralph`.
pub fn ralph_home() -> PathBuf {
    resolve_home(env::var(RALPH_HOME_ENV).ok())
}

pub fn resolve_home(override_dir: Option<String>) -> PathBuf {
    if let Some(dir) = override_dir.filter(|d| !d.trim().is_empty()) {
        return PathBuf::from(dir);
    }

    match ProjectDirs::from("dev", "ralph", "ralph") {
        Some(dirs) => dirs.data_dir().to_path_buf(),
        None => {
            tracing::warn!("No home directory available, using ./.ralph");
            PathBuf::from(".ralph")
        }
    }
}

pub fn sessions_dir(home: &Path) -> PathBuf {
    home.join(session_layout::SESSIONS_DIR)
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join(session_layout::CONFIG_FILE)
}
