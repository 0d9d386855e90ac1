//! Session persistence for ralph runs
//!
//! One directory per session under `<ralph home>/sessions/<uuid>/`. The
//! session record and task list are overwritten atomically; the progress
//! file and the agent-call log are append-only.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;
use uuid::Uuid;
use workspace_utils::{
    assets::{session_layout, sessions_dir},
    fs as ufs,
};

use super::task::Task;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session id '{0}': expected a UUID")]
    InvalidId(String),
    #[error("Session {0} not found")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt session file: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
}

/// Durable record of one ralph run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RalphSession {
    pub session_id: Uuid,
    pub session_dir: PathBuf,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    pub status: SessionStatus,
    pub iteration: u32,
    pub max_iterations: u32,
    pub yolo: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RalphSession {
    pub fn new(session_id: Uuid, session_dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            session_dir,
            prompt: None,
            tasks: Vec::new(),
            status: SessionStatus::Running,
            iteration: 0,
            max_iterations: 0,
            yolo: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One line of `logs/agent-calls.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub iteration: u32,
    pub should_continue: bool,
    pub max_iterations_reached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LogEntry {
    pub fn new(
        action: impl Into<String>,
        iteration: u32,
        should_continue: bool,
        max_iterations_reached: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            iteration,
            should_continue,
            max_iterations_reached,
            agent: None,
            task_id: None,
            success: None,
            detail: None,
        }
    }

    pub fn agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Validate a user-supplied session id. Nothing touches the disk before this.
pub fn parse_session_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| SessionError::InvalidId(raw.to_string()))
}

pub fn session_dir(home: &Path, session_id: Uuid) -> PathBuf {
    sessions_dir(home).join(session_id.to_string())
}

/// Create (if needed) the directory for `session_id`, including `logs/`.
pub async fn create_session_directory(home: &Path, session_id: Uuid) -> Result<PathBuf> {
    let dir = session_dir(home, session_id);
    if ufs::ensure_dir(&dir.join(session_layout::LOGS_DIR)).await? {
        tracing::info!("[SESSION] Created session directory {}", dir.display());
    }
    Ok(dir)
}

/// Overwrite the durable record. `session.json` goes first, then `tasks.json`.
pub async fn save_session(dir: &Path, session: &RalphSession) -> Result<()> {
    ufs::write_json_atomic(&dir.join(session_layout::SESSION_FILE), session).await?;
    ufs::write_json_atomic(&dir.join(session_layout::TASKS_FILE), &session.tasks).await?;
    tracing::debug!(
        session_id = %session.session_id,
        iteration = session.iteration,
        status = %session.status,
        "[SESSION] Saved"
    );
    Ok(())
}

fn id_from_dir(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

/// Look for a saved session; `None` when the directory has no record.
pub async fn load_session_if_exists(dir: &Path) -> Result<Option<RalphSession>> {
    let record = match tokio::fs::read(dir.join(session_layout::SESSION_FILE)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut session: RalphSession = serde_json::from_slice(&record)?;

    // tasks.json is authoritative when readable
    match tokio::fs::read(dir.join(session_layout::TASKS_FILE)).await {
        Ok(bytes) => match serde_json::from_slice::<Vec<Task>>(&bytes) {
            Ok(tasks) => session.tasks = tasks,
            Err(e) => tracing::warn!("[SESSION] Ignoring unreadable tasks.json: {}", e),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    Ok(Some(session))
}

pub async fn load_session(dir: &Path) -> Result<RalphSession> {
    load_session_if_exists(dir)
        .await?
        .ok_or_else(|| SessionError::NotFound(id_from_dir(dir)))
}

pub async fn append_log(dir: &Path, entry: &LogEntry) -> Result<()> {
    let path = dir
        .join(session_layout::LOGS_DIR)
        .join(session_layout::AGENT_CALLS_FILE);
    ufs::append_json_line(&path, entry).await?;
    Ok(())
}

pub async fn append_progress(dir: &Path, line: &str) -> Result<()> {
    ufs::append_line(&dir.join(session_layout::PROGRESS_FILE), line).await?;
    Ok(())
}

/// All readable sessions under `home`, most recently updated first.
pub async fn list_sessions(home: &Path) -> Result<Vec<RalphSession>> {
    let root = sessions_dir(home);
    let mut entries = match tokio::fs::read_dir(&root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut sessions = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match load_session_if_exists(&path).await {
            Ok(Some(session)) => sessions.push(session),
            Ok(None) => {}
            Err(e) => tracing::warn!("[SESSION] Skipping {}: {}", path.display(), e),
        }
    }
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(sessions)
}
