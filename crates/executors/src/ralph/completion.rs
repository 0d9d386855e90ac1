//! Completion Detection for Ralph Loops
//!
//! Two things end the loop:
//! 1. The completion marker (default `COMPLETE`) anywhere in agent output
//! 2. The iteration cap, when one is set
//!
//! The marker always wins, so a completion at iteration 1 is honoured and an
//! uncapped run only ever stops on the marker (or all work done outside yolo).

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use super::session::SessionStatus;

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    /// Completion marker found in agent output
    MarkerDetected,
    /// Every task completed and the last review was clean
    AllTasksDone,
    /// Iteration cap hit without completion
    MaxIterations,
}

/// Detects the completion marker in agent output
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    marker: String,
}

impl CompletionDetector {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Plain, case-sensitive substring match
    pub fn is_complete(&self, output: &str) -> bool {
        !self.marker.is_empty() && output.contains(&self.marker)
    }

    /// Lines mentioning the marker, for logging
    pub fn extract_completion_context(&self, output: &str) -> Option<String> {
        let relevant_lines: Vec<&str> = output
            .lines()
            .filter(|line| self.is_complete(line))
            .take(5)
            .collect();

        if relevant_lines.is_empty() {
            None
        } else {
            Some(relevant_lines.join("\n"))
        }
    }
}

impl Default for CompletionDetector {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_COMPLETION_MARKER)
    }
}

/// `maxIterations = 0` means unlimited.
pub fn max_iterations_reached(max_iterations: u32, iteration: u32) -> bool {
    max_iterations > 0 && iteration >= max_iterations
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionDecision {
    pub yolo_complete: bool,
    pub max_iterations_reached: bool,
    pub should_continue: bool,
    pub session_status: SessionStatus,
    pub reason: Option<StopReason>,
}

/// Decide whether the loop goes on after `iteration` (already incremented).
///
/// `all_work_done` is only meaningful outside yolo mode; callers pass
/// `false` in yolo mode.
pub fn evaluate_completion(
    marker_seen: bool,
    all_work_done: bool,
    iteration: u32,
    max_iterations: u32,
) -> CompletionDecision {
    let cap_hit = max_iterations_reached(max_iterations, iteration);

    let reason = if marker_seen {
        Some(StopReason::MarkerDetected)
    } else if all_work_done {
        Some(StopReason::AllTasksDone)
    } else if cap_hit {
        Some(StopReason::MaxIterations)
    } else {
        None
    };

    CompletionDecision {
        yolo_complete: marker_seen,
        max_iterations_reached: cap_hit,
        should_continue: reason.is_none(),
        session_status: if reason.is_some() {
            SessionStatus::Completed
        } else {
            SessionStatus::Running
        },
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_detected_anywhere() {
        let detector = CompletionDetector::default();
        assert!(detector.is_complete("...COMPLETE\nThe implementation is ready."));
        assert!(detector.is_complete("INCOMPLETE"));
        assert!(!detector.is_complete("complete"));
        assert!(!detector.is_complete(""));
    }

    #[test]
    fn test_custom_marker() {
        let detector = CompletionDetector::new("<done/>");
        assert!(detector.is_complete("all good <done/>"));
        assert!(!detector.is_complete("COMPLETE"));
    }

    #[test]
    fn test_empty_marker_never_matches() {
        assert!(!CompletionDetector::new("").is_complete("anything"));
    }

    #[test]
    fn test_extract_context() {
        let detector = CompletionDetector::default();
        let output = "step one\nall tasks COMPLETE\nbye";
        assert_eq!(
            detector.extract_completion_context(output).as_deref(),
            Some("all tasks COMPLETE")
        );
        assert_eq!(detector.extract_completion_context("nothing"), None);
    }

    #[test]
    fn test_cap_formula() {
        for max in [0u32, 1, 2, 5, 50] {
            for iteration in 0u32..=60 {
                assert_eq!(
                    max_iterations_reached(max, iteration),
                    max > 0 && iteration >= max,
                    "max={max} iteration={iteration}"
                );
            }
        }
    }

    #[test]
    fn test_unlimited_never_caps() {
        for iteration in 0..=100_000u32 {
            assert!(!max_iterations_reached(0, iteration));
        }
        assert!(!max_iterations_reached(0, u32::MAX));
    }

    #[test]
    fn test_marker_wins_at_first_iteration() {
        let decision = evaluate_completion(true, false, 1, 50);
        assert!(decision.yolo_complete);
        assert!(!decision.should_continue);
        assert!(!decision.max_iterations_reached);
        assert_eq!(decision.session_status, SessionStatus::Completed);
        assert_eq!(decision.reason, Some(StopReason::MarkerDetected));
    }

    #[test]
    fn test_marker_wins_over_cap() {
        let decision = evaluate_completion(true, false, 50, 50);
        assert_eq!(decision.reason, Some(StopReason::MarkerDetected));
        assert!(decision.max_iterations_reached);
        assert!(decision.yolo_complete);
    }

    #[test]
    fn test_cap_stops_without_marker() {
        let decision = evaluate_completion(false, false, 50, 50);
        assert!(decision.max_iterations_reached);
        assert!(!decision.should_continue);
        assert!(!decision.yolo_complete);
        assert_eq!(decision.session_status, SessionStatus::Completed);
    }

    #[test]
    fn test_uncapped_continues() {
        let decision = evaluate_completion(false, false, 100_000, 0);
        assert!(!decision.max_iterations_reached);
        assert!(decision.should_continue);
        assert_eq!(decision.session_status, SessionStatus::Running);
    }

    #[test]
    fn test_all_work_done_completes() {
        let decision = evaluate_completion(false, true, 3, 0);
        assert!(!decision.should_continue);
        assert!(!decision.yolo_complete);
        assert_eq!(decision.reason, Some(StopReason::AllTasksDone));
    }
}
