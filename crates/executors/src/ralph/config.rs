use serde::{Deserialize, Serialize};

pub const DEFAULT_COMPLETION_MARKER: &str = "COMPLETE";

/// Configuration for the ralph workflow (`[ralph]` in the CLI config)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RalphConfig {
    /// Token that ends the loop when it appears in agent output
    #[serde(default = "default_completion_marker")]
    pub completion_marker: String,
    #[serde(default = "default_planner_agent")]
    pub planner_agent: String,
    #[serde(default = "default_implementer_agent")]
    pub implementer_agent: String,
    #[serde(default = "default_reviewer_agent")]
    pub reviewer_agent: String,
    #[serde(default = "default_fixer_agent")]
    pub fixer_agent: String,
    /// One reviewer runs per angle, in parallel
    #[serde(default = "default_review_angles")]
    pub review_angles: Vec<String>,
    /// Planning attempts before falling back to free-form iterations
    #[serde(default = "default_max_decompose_attempts")]
    pub max_decompose_attempts: u32,
    /// Concurrent sub-agents during review (0 = all at once)
    #[serde(default)]
    pub max_parallel: usize,
    /// Prepended to every prompt
    #[serde(default)]
    pub system_prefix: Option<String>,
}

fn default_completion_marker() -> String {
    DEFAULT_COMPLETION_MARKER.to_string()
}

fn default_planner_agent() -> String {
    "planner".to_string()
}

fn default_implementer_agent() -> String {
    "implementer".to_string()
}

fn default_reviewer_agent() -> String {
    "reviewer".to_string()
}

fn default_fixer_agent() -> String {
    "fixer".to_string()
}

fn default_review_angles() -> Vec<String> {
    vec![
        "correctness".to_string(),
        "completeness".to_string(),
        "code quality".to_string(),
    ]
}

fn default_max_decompose_attempts() -> u32 {
    3
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            completion_marker: default_completion_marker(),
            planner_agent: default_planner_agent(),
            implementer_agent: default_implementer_agent(),
            reviewer_agent: default_reviewer_agent(),
            fixer_agent: default_fixer_agent(),
            review_angles: default_review_angles(),
            max_decompose_attempts: default_max_decompose_attempts(),
            max_parallel: 0,
            system_prefix: None,
        }
    }
}

impl RalphConfig {
    /// Set completion marker
    pub fn with_completion_marker(mut self, marker: &str) -> Self {
        self.completion_marker = marker.to_string();
        self
    }

    /// Set review angles
    pub fn with_review_angles<I, T>(mut self, angles: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.review_angles = angles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_decompose_attempts(mut self, attempts: u32) -> Self {
        self.max_decompose_attempts = attempts;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: RalphConfig =
            serde_json::from_str(r#"{"completion_marker":"DONE","review_angles":["security"]}"#)
                .unwrap();
        assert_eq!(config.completion_marker, "DONE");
        assert_eq!(config.review_angles, vec!["security"]);
        assert_eq!(config.max_decompose_attempts, 3);
        assert_eq!(config.planner_agent, "planner");
    }
}
