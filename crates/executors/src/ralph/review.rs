//! Review verdicts

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    #[serde(default)]
    pub file: String,
    pub description: String,
    #[serde(default)]
    pub severity: String,
    /// Lower runs first
    #[serde(default)]
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewVerdict {
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub overall_correct: bool,
    #[serde(default)]
    pub summary: String,
}

impl ReviewVerdict {
    pub fn is_clean(&self) -> bool {
        self.overall_correct && self.findings.is_empty()
    }

    /// Verdict for a reviewer that could not be heard from
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            findings: Vec::new(),
            overall_correct: false,
            summary: reason.into(),
        }
    }

    /// Combine per-angle verdicts: findings are concatenated without
    /// duplicates, and the result is correct only if every angle says so.
    pub fn merge(verdicts: impl IntoIterator<Item = ReviewVerdict>) -> Self {
        let mut merged = ReviewVerdict {
            overall_correct: true,
            ..Default::default()
        };
        let mut summaries = Vec::new();
        let mut any = false;

        for verdict in verdicts {
            any = true;
            merged.overall_correct &= verdict.overall_correct;
            for finding in verdict.findings {
                if !merged.findings.iter().any(|f| {
                    f.file == finding.file && f.description == finding.description
                }) {
                    merged.findings.push(finding);
                }
            }
            if !verdict.summary.is_empty() {
                summaries.push(verdict.summary);
            }
        }

        merged.overall_correct &= any;
        merged.findings.sort_by_key(|f| f.priority);
        merged.summary = summaries.join("\n");
        merged
    }
}

/// Parse a reviewer's output: a fenced or bare JSON object.
pub fn parse_verdict(output: &str) -> Option<ReviewVerdict> {
    let candidate = match (output.find('{'), output.rfind('}')) {
        (Some(start), Some(end)) if start < end => &output[start..=end],
        _ => return None,
    };
    match serde_json::from_str(candidate) {
        Ok(verdict) => Some(verdict),
        Err(e) => {
            tracing::warn!("[RALPH] Unparseable review verdict: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_verdict() {
        let verdict =
            parse_verdict(r#"```json
{"findings": [], "overallCorrect": true, "summary": "looks good"}
```"#)
            .unwrap();
        assert!(verdict.is_clean());
        assert_eq!(verdict.summary, "looks good");
    }

    #[test]
    fn test_parse_findings() {
        let verdict = parse_verdict(
            r#"Review: {"findings":[{"file":"src/lib.rs","description":"panics on empty input","severity":"high","priority":1}],"overallCorrect":false}"#,
        )
        .unwrap();
        assert!(!verdict.is_clean());
        assert_eq!(verdict.findings[0].file, "src/lib.rs");
        assert_eq!(verdict.findings[0].priority, 1);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_verdict("no json here").is_none());
        assert!(parse_verdict("{ not json }").is_none());
    }

    #[test]
    fn test_merge() {
        let finding = |file: &str, priority| Finding {
            file: file.to_string(),
            description: "bug".to_string(),
            severity: "medium".to_string(),
            priority,
        };
        let merged = ReviewVerdict::merge([
            ReviewVerdict {
                findings: vec![finding("b.rs", 2), finding("a.rs", 1)],
                overall_correct: false,
                summary: "two bugs".to_string(),
            },
            ReviewVerdict {
                findings: vec![finding("a.rs", 1)],
                overall_correct: true,
                summary: String::new(),
            },
        ]);
        assert!(!merged.overall_correct);
        let files: Vec<&str> = merged.findings.iter().map(|f| f.file.as_str()).collect();
        assert_eq!(files, vec!["a.rs", "b.rs"]);
        assert_eq!(merged.summary, "two bugs");
    }

    #[test]
    fn test_merge_nothing_is_not_correct() {
        assert!(!ReviewVerdict::merge(Vec::new()).overall_correct);
    }
}
