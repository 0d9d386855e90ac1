//! Prompt Builder for Ralph Loops
//!
//! One prompt per phase: planning, implementing a task, free-form iteration,
//! review from one angle, and fixing one finding.

use super::{review::Finding, task::Task};

/// Builder for Ralph loop prompts
#[derive(Debug, Clone)]
pub struct RalphPromptBuilder {
    completion_marker: String,
    system_prefix: Option<String>,
}

impl RalphPromptBuilder {
    pub fn new(completion_marker: &str) -> Self {
        Self {
            completion_marker: completion_marker.to_string(),
            system_prefix: None,
        }
    }

    /// Set system prefix
    pub fn system_prefix(mut self, prefix: Option<&str>) -> Self {
        self.system_prefix = prefix.map(str::to_string);
        self
    }

    fn prefix(&self) -> String {
        self.system_prefix
            .as_ref()
            .map(|p| format!("{}\n\n", p))
            .unwrap_or_default()
    }

    fn instruction_section(instruction: Option<&str>) -> String {
        instruction
            .map(|i| format!("\n## Follow-up From the User\n{}\n", i))
            .unwrap_or_default()
    }

    fn task_overview(tasks: &[Task]) -> String {
        tasks
            .iter()
            .map(|t| format!("- {} [{}] {}", t.id, t.status, t.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Ask the planner to break the goal into a task list
    pub fn build_decompose(&self, goal: &str, attempt: u32) -> String {
        let retry_note = if attempt > 1 {
            format!(
                "\nAttempt {attempt}: the previous plan was rejected. Follow the format exactly.\n"
            )
        } else {
            String::new()
        };

        format!(
            r##"{prefix}## Goal
{goal}
{retry_note}
## Output Format
Break the goal into small, ordered tasks. Respond with ONLY a JSON array:
```json
[{{"id":"#1","content":"...","status":"pending","activeForm":"...","blockedBy":[]}}]
```

Rules:
- ids are "#1", "#2", ... and unique
- every blockedBy entry is a single id like "#2" (no ranges such as "#2-#5")
- every status is "pending""##,
            prefix = self.prefix(),
            goal = goal,
            retry_note = retry_note,
        )
    }

    /// Prompt for implementing a single task
    pub fn build_implement(
        &self,
        task: &Task,
        tasks: &[Task],
        goal: Option<&str>,
        instruction: Option<&str>,
    ) -> String {
        let goal_section = goal
            .map(|g| format!("## Overall Goal\n{}\n\n", g))
            .unwrap_or_default();

        format!(
            r#"{prefix}{goal_section}## Current Task {id}
{content}

## All Tasks
{overview}
{instruction}
## Completion Protocol
Implement only this task. If the ENTIRE goal is finished and verified,
output {marker} on its own line."#,
            prefix = self.prefix(),
            goal_section = goal_section,
            id = task.id,
            content = task.content,
            overview = Self::task_overview(tasks),
            instruction = Self::instruction_section(instruction),
            marker = self.completion_marker,
        )
    }

    /// Prompt for an iteration without a task list
    pub fn build_free_form(&self, goal: &str, iteration: u32, instruction: Option<&str>) -> String {
        format!(
            r#"{prefix}## Ralph Loop - Iteration {iteration}
You are continuing work on this goal. Your previous changes are saved.

## Goal
{goal}
{instruction}
## Completion Protocol
When the goal is FULLY COMPLETE, output {marker}.
If not complete, continue working. The loop will restart if needed."#,
            prefix = self.prefix(),
            iteration = iteration,
            goal = goal,
            instruction = Self::instruction_section(instruction),
            marker = self.completion_marker,
        )
    }

    /// Prompt for one review angle
    pub fn build_review(&self, angle: &str, goal: Option<&str>, tasks: &[Task]) -> String {
        format!(
            r#"{prefix}## Review Focus: {angle}
Review the current state of the repository against the goal and tasks.

## Goal
{goal}

## Tasks
{overview}

## Output Format
Respond with ONLY a JSON object:
```json
{{"findings":[{{"file":"...","description":"...","severity":"low|medium|high|critical","priority":1}}],"overallCorrect":true,"summary":"..."}}
```
An empty findings list with "overallCorrect": true means the work is correct."#,
            prefix = self.prefix(),
            angle = angle,
            goal = goal.unwrap_or("(no goal given)"),
            overview = Self::task_overview(tasks),
        )
    }

    /// Prompt for fixing a single finding
    pub fn build_fix(&self, finding: &Finding) -> String {
        format!(
            r#"{prefix}## Fix Required ({severity}, priority {priority})
File: {file}

{description}

Fix this issue and verify the fix. Do not change unrelated code."#,
            prefix = self.prefix(),
            severity = finding.severity,
            priority = finding.priority,
            file = finding.file,
            description = finding.description,
        )
    }
}

impl Default for RalphPromptBuilder {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_COMPLETION_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_decompose_prompt() {
        let prompt = RalphPromptBuilder::default().build_decompose("Build a CLI", 1);

        assert!(prompt.contains("Build a CLI"));
        assert!(prompt.contains(r##""id":"#1""##));
        assert!(!prompt.contains("Attempt"));
    }

    #[test]
    fn test_decompose_retry_is_flagged() {
        let prompt = RalphPromptBuilder::default().build_decompose("Build a CLI", 2);
        assert!(prompt.contains("Attempt 2"));
    }

    #[test]
    fn test_build_implement_prompt() {
        let tasks = vec![Task::new("#1", "write lexer"), Task::new("#2", "write parser")];
        let prompt = RalphPromptBuilder::new("DONE")
            .system_prefix(Some("You are careful."))
            .build_implement(&tasks[1], &tasks, Some("a compiler"), Some("use nom"));

        assert!(prompt.starts_with("You are careful."));
        assert!(prompt.contains("Current Task #2"));
        assert!(prompt.contains("- #1 [pending] write lexer"));
        assert!(prompt.contains("use nom"));
        assert!(prompt.contains("output DONE"));
    }

    #[test]
    fn test_build_free_form() {
        let prompt = RalphPromptBuilder::default().build_free_form("Task", 3, None);

        assert!(prompt.contains("Iteration 3"));
        assert!(prompt.contains("COMPLETE"));
        assert!(!prompt.contains("Follow-up"));
    }

    #[test]
    fn test_build_review_and_fix() {
        let builder = RalphPromptBuilder::default();
        let review = builder.build_review("security", None, &[]);
        assert!(review.contains("Review Focus: security"));
        assert!(review.contains("overallCorrect"));

        let fix = builder.build_fix(&Finding {
            file: "src/main.rs".to_string(),
            description: "unchecked index".to_string(),
            severity: "high".to_string(),
            priority: 1,
        });
        assert!(fix.contains("src/main.rs"));
        assert!(fix.contains("unchecked index"));
        assert!(fix.contains("high, priority 1"));
    }
}
