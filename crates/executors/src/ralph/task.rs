//! Task list model and validation
//!
//! The planner's output is only trusted when the whole list is well formed.
//! Any defect rejects the list, and callers get an empty list back.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;

lazy_static! {
    static ref TASK_ID: Regex = Regex::new(r"^#[1-9][0-9]*$").unwrap();
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub content: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub active_form: String,
    #[serde(default)]
    pub blocked_by: Vec<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            active_form: format!("Working on: {content}"),
            content,
            status: TaskStatus::Pending,
            blocked_by: Vec::new(),
        }
    }

    pub fn blocked_by<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.blocked_by = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Numeric part of the id (`#12` -> 12).
    pub fn number(&self) -> Option<u32> {
        self.id.strip_prefix('#')?.parse().ok()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskListError {
    #[error("task list is not valid JSON: {0}")]
    Malformed(String),
    #[error("invalid task id '{0}'")]
    InvalidId(String),
    #[error("task {task} has invalid dependency '{dependency}'")]
    InvalidDependency { task: String, dependency: String },
    #[error("duplicate task id '{0}'")]
    DuplicateId(String),
    #[error("task {0} is already in error state")]
    ErrorStatus(String),
}

/// `#N` with N a positive number that fits in a `u32`; ASCII digits only.
pub fn is_valid_task_id(id: &str) -> bool {
    TASK_ID.is_match(id) && id[1..].parse::<u32>().is_ok()
}

/// Check every invariant of a task list, reporting the first defect.
pub fn validate_tasks(tasks: &[Task]) -> Result<(), TaskListError> {
    let mut seen = HashSet::new();
    for task in tasks {
        if !is_valid_task_id(&task.id) {
            return Err(TaskListError::InvalidId(task.id.clone()));
        }
        if !seen.insert(task.id.as_str()) {
            return Err(TaskListError::DuplicateId(task.id.clone()));
        }
        if let Some(dependency) = task.blocked_by.iter().find(|d| !is_valid_task_id(d)) {
            return Err(TaskListError::InvalidDependency {
                task: task.id.clone(),
                dependency: dependency.clone(),
            });
        }
        if task.status == TaskStatus::Error {
            return Err(TaskListError::ErrorStatus(task.id.clone()));
        }
    }
    Ok(())
}

pub fn parse_tasks_checked(json_text: &str) -> Result<Vec<Task>, TaskListError> {
    let tasks: Vec<Task> =
        serde_json::from_str(json_text).map_err(|e| TaskListError::Malformed(e.to_string()))?;
    validate_tasks(&tasks)?;
    Ok(tasks)
}

/// Parse and validate a task list. Any defect yields an empty list.
pub fn parse_tasks(json_text: &str) -> Vec<Task> {
    match parse_tasks_checked(json_text) {
        Ok(tasks) => tasks,
        Err(e) => {
            tracing::warn!("[RALPH] Rejected task list: {}", e);
            Vec::new()
        }
    }
}

/// Pull the JSON array out of free-form agent output: a fenced block when
/// there is one, otherwise the outermost `[...]` span.
pub fn extract_task_json(output: &str) -> &str {
    if let Some(block) = FENCED_BLOCK
        .captures_iter(output)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|block| block.starts_with('['))
    {
        return block;
    }

    match (output.find('['), output.rfind(']')) {
        (Some(start), Some(end)) if start < end => &output[start..=end],
        _ => output.trim(),
    }
}

fn dependencies_met(task: &Task, statuses: &HashMap<&str, TaskStatus>) -> bool {
    // Ids missing from the list cannot block anything
    task.blocked_by.iter().all(|dep| {
        statuses
            .get(dep.as_str())
            .is_none_or(|status| *status == TaskStatus::Completed)
    })
}

/// Tasks that may run now: not finished, not failed, and every dependency
/// completed. `in_progress` counts so an interrupted task is picked up again.
pub fn eligible_tasks(tasks: &[Task]) -> Vec<&Task> {
    let statuses: HashMap<&str, TaskStatus> =
        tasks.iter().map(|t| (t.id.as_str(), t.status)).collect();
    tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::InProgress))
        .filter(|t| dependencies_met(t, &statuses))
        .collect()
}

pub fn all_completed(tasks: &[Task]) -> bool {
    !tasks.is_empty() && tasks.iter().all(|t| t.status == TaskStatus::Completed)
}

/// Next free `#N` id for an appended task; `None` once `#4294967295` is taken.
pub fn next_task_id(tasks: &[Task]) -> Option<String> {
    let max = tasks.iter().filter_map(Task::number).max().unwrap_or(0);
    max.checked_add(1).map(|n| format!("#{n}"))
}

/// `(completed, total)` for progress display.
pub fn progress(tasks: &[Task]) -> (usize, usize) {
    let done = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    (done, tasks.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_valid_task() {
        let tasks = parse_tasks(
            r##"[{"id":"#1","content":"Task 1","status":"pending","activeForm":"Working on task 1"}]"##,
        );
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[0].active_form, "Working on task 1");
        assert!(tasks[0].blocked_by.is_empty());
    }

    #[test]
    fn test_dependencies_kept_in_order() {
        let tasks = parse_tasks(
            r##"[
                {"id":"#1","content":"a","status":"pending","activeForm":"a"},
                {"id":"#2","content":"b","status":"pending","activeForm":"b"},
                {"id":"#3","content":"c","status":"pending","activeForm":"c","blockedBy":["#2","#1"]}
            ]"##,
        );
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[2].blocked_by, vec!["#2", "#1"]);
    }

    #[test]
    fn test_rejected_lists_are_empty() {
        let cases = [
            // duplicate id
            r##"[{"id":"#1","content":"a","status":"pending","activeForm":"a"},
                 {"id":"#1","content":"b","status":"pending","activeForm":"b"}]"##,
            // range dependency
            r##"[{"id":"#1","content":"a","status":"pending","activeForm":"a","blockedBy":["#2-#11"]}]"##,
            // bad ids
            r##"[{"id":"1","content":"a","status":"pending","activeForm":"a"}]"##,
            r##"[{"id":"#0","content":"a","status":"pending","activeForm":"a"}]"##,
            r##"[{"id":"#01","content":"a","status":"pending","activeForm":"a"}]"##,
            r##"[{"id":"task-1","content":"a","status":"pending","activeForm":"a"}]"##,
            // error status anywhere
            r##"[{"id":"#1","content":"a","status":"pending","activeForm":"a"},
                 {"id":"#2","content":"b","status":"error","activeForm":"b"}]"##,
            // malformed
            r##"[{"id":"#1","content":"a""##,
            r##"{"id":"#1"}"##,
            r##"[{"id":"#1","content":"a","status":"done","activeForm":"a"}]"##,
        ];
        for case in cases {
            assert!(parse_tasks(case).is_empty(), "accepted: {case}");
        }
    }

    #[test]
    fn test_checked_parse_names_defect() {
        let err = parse_tasks_checked(
            r##"[{"id":"#1","content":"a","status":"pending","blockedBy":["#2-#11"]}]"##,
        )
        .unwrap_err();
        assert_eq!(
            err,
            TaskListError::InvalidDependency {
                task: "#1".to_string(),
                dependency: "#2-#11".to_string()
            }
        );
    }

    #[test]
    fn test_extract_from_fenced_block() {
        let output = "Here is the plan:\n```json\n[{\"id\":\"#1\"}]\n```\nDone.";
        assert_eq!(extract_task_json(output), "[{\"id\":\"#1\"}]");
    }

    #[test]
    fn test_extract_from_bare_text() {
        let output = "Plan follows [{\"id\":\"#1\",\"blockedBy\":[]}] end";
        assert_eq!(extract_task_json(output), "[{\"id\":\"#1\",\"blockedBy\":[]}]");
    }

    #[test]
    fn test_eligibility_follows_dependencies() {
        let tasks = vec![
            Task::new("#1", "a").with_status(TaskStatus::Completed),
            Task::new("#2", "b").blocked_by(["#1"]),
            Task::new("#3", "c").blocked_by(["#2"]),
            Task::new("#4", "d").with_status(TaskStatus::Error),
            Task::new("#5", "e").blocked_by(["#4"]),
            Task::new("#6", "f").with_status(TaskStatus::InProgress),
        ];
        let ids: Vec<&str> = eligible_tasks(&tasks).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["#2", "#6"]);
    }

    #[test]
    fn test_unknown_dependency_does_not_block() {
        let tasks = vec![Task::new("#1", "a").blocked_by(["#9"])];
        assert_eq!(eligible_tasks(&tasks).len(), 1);
    }

    #[test]
    fn test_next_task_id_and_progress() {
        let tasks = vec![
            Task::new("#1", "a").with_status(TaskStatus::Completed),
            Task::new("#7", "b"),
        ];
        assert_eq!(next_task_id(&tasks).as_deref(), Some("#8"));
        assert_eq!(next_task_id(&[]).as_deref(), Some("#1"));
        assert_eq!(progress(&tasks), (1, 2));
        assert!(!all_completed(&tasks));
        assert!(!all_completed(&[]));
    }

    #[test]
    fn test_task_ids_must_be_ascii_and_fit() {
        assert!(is_valid_task_id("#4294967295"));
        assert!(!is_valid_task_id("#4294967296"));
        assert!(!is_valid_task_id("#99999999999999999999"));
        assert!(!is_valid_task_id("#1\u{0663}"));
        assert!(!is_valid_task_id("#\u{0661}"));
        assert!(!is_valid_task_id("#0"));
        assert!(!is_valid_task_id("#01"));
    }

    #[test]
    fn test_non_ascii_digit_id_rejected_by_checked_parse() {
        let err = parse_tasks_checked(
            "[{\"id\":\"#1\u{0663}\",\"content\":\"a\",\"status\":\"pending\"}]",
        )
        .unwrap_err();
        assert_eq!(err, TaskListError::InvalidId("#1\u{0663}".to_string()));
    }

    #[test]
    fn test_next_task_id_stops_at_u32_max() {
        let tasks = vec![Task::new("#4294967295", "last")];
        assert_eq!(next_task_id(&tasks), None);
    }
}
