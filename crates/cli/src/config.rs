//! Configuration management for the Ralph CLI
//!
//! Handles loading and saving `config.toml` under the ralph home directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use executors::{command::CommandAgentConfig, ralph::RalphConfig};
use serde::{Deserialize, Serialize};
use workspace_utils::assets;

/// Configuration for the Ralph CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: CommandAgentConfig,

    #[serde(default)]
    pub ralph: RalphConfig,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Get the path to the config file
    pub fn config_path(home: &Path) -> PathBuf {
        assets::config_path(home)
    }

    /// Load configuration from file, or return defaults if not found
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Get a configuration value by key path (e.g., "ralph.completion_marker")
    pub fn get(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["agent", "program"] => Some(self.agent.program.clone()),
            ["agent", "args"] => Some(self.agent.args.join(",")),
            ["agent", "max_context_tokens"] => Some(self.agent.max_context_tokens.to_string()),
            ["agent", "working_dir"] => self
                .agent
                .working_dir
                .as_ref()
                .map(|d| d.display().to_string()),
            ["ralph", "completion_marker"] => Some(self.ralph.completion_marker.clone()),
            ["ralph", "planner_agent"] => Some(self.ralph.planner_agent.clone()),
            ["ralph", "implementer_agent"] => Some(self.ralph.implementer_agent.clone()),
            ["ralph", "reviewer_agent"] => Some(self.ralph.reviewer_agent.clone()),
            ["ralph", "fixer_agent"] => Some(self.ralph.fixer_agent.clone()),
            ["ralph", "review_angles"] => Some(self.ralph.review_angles.join(",")),
            ["ralph", "max_decompose_attempts"] => {
                Some(self.ralph.max_decompose_attempts.to_string())
            }
            ["ralph", "max_parallel"] => Some(self.ralph.max_parallel.to_string()),
            ["ralph", "system_prefix"] => self.ralph.system_prefix.clone(),
            _ => None,
        }
    }

    /// Set a configuration value by key path. List values are comma separated.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["agent", "program"] => self.agent.program = value.to_string(),
            ["agent", "args"] => self.agent.args = split_list(value),
            ["agent", "max_context_tokens"] => {
                self.agent.max_context_tokens = value
                    .parse()
                    .with_context(|| format!("{} expects a number", key))?
            }
            ["agent", "working_dir"] => self.agent.working_dir = Some(PathBuf::from(value)),
            ["ralph", "completion_marker"] => self.ralph.completion_marker = value.to_string(),
            ["ralph", "planner_agent"] => self.ralph.planner_agent = value.to_string(),
            ["ralph", "implementer_agent"] => self.ralph.implementer_agent = value.to_string(),
            ["ralph", "reviewer_agent"] => self.ralph.reviewer_agent = value.to_string(),
            ["ralph", "fixer_agent"] => self.ralph.fixer_agent = value.to_string(),
            ["ralph", "review_angles"] => self.ralph.review_angles = split_list(value),
            ["ralph", "max_decompose_attempts"] => {
                self.ralph.max_decompose_attempts = value
                    .parse()
                    .with_context(|| format!("{} expects a number", key))?
            }
            ["ralph", "max_parallel"] => {
                self.ralph.max_parallel = value
                    .parse()
                    .with_context(|| format!("{} expects a number", key))?
            }
            ["ralph", "system_prefix"] => {
                self.ralph.system_prefix = Some(value.to_string()).filter(|v| !v.is_empty())
            }
            _ => anyhow::bail!("Unknown configuration key: {}", key),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&Config::config_path(dir.path())).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.ralph.completion_marker, "COMPLETE");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = Config::config_path(dir.path());
        std::fs::write(
            &path,
            "[ralph]\ncompletion_marker = \"DONE\"\n\n[agent]\nprogram = \"codex\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.ralph.completion_marker, "DONE");
        assert_eq!(config.ralph.max_decompose_attempts, 3);
        assert_eq!(config.agent.program, "codex");
        assert_eq!(config.agent.args, vec!["--print"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = Config::config_path(&dir.path().join("nested"));

        let mut config = Config::default();
        config.set("ralph.review_angles", "security, tests").unwrap();
        config.set("agent.max_context_tokens", "1000").unwrap();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.ralph.review_angles, vec!["security", "tests"]);
        assert_eq!(loaded.get("agent.max_context_tokens").as_deref(), Some("1000"));
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = Config::config_path(dir.path());
        std::fs::write(&path, "[ralph\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config"));
    }

    #[test]
    fn test_set_rejects_unknown_key_and_bad_numbers() {
        let mut config = Config::default();
        assert!(config.set("server.url", "x").is_err());
        assert!(config.set("ralph.max_parallel", "many").is_err());
        assert_eq!(config.get("server.url"), None);
    }
}
