//! Orchestrator configuration.
//!
//! Values are layered: built-in defaults, then `tierstack.toml`, then
//! `TIERSTACK_*` environment variables, then command-line flags (applied by
//! the binary on top of the returned struct).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Default config file name looked up in the repository root.
pub const CONFIG_FILE: &str = "tierstack.toml";

/// Runtime settings for a planning/orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Trunk branch; detected from the repository when unset.
    pub trunk: Option<String>,
    /// Prefix for every branch the orchestrator creates.
    pub branch_prefix: String,
    /// Maximum ticket tasks running at once within a tier.
    pub max_parallel: usize,
    pub remote: String,
    /// Where worktrees are created; `<repo parent>/.worktrees/<repo>` when unset.
    pub worktree_root: Option<PathBuf>,
    /// Remove ticket worktrees once their branch is merged.
    pub cleanup_worktrees: bool,
    /// Integration PR title. `{tier}` and `{tickets}` are substituted.
    pub pr_title_template: String,
    /// Argv prefix of the ticket tracker CLI.
    pub tracker_command: Vec<String>,
    /// Argv run inside each ticket worktree to perform the work.
    pub work_command: Vec<String>,
    /// Directory for persisted run summaries.
    pub summary_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            trunk: None,
            branch_prefix: "stack".to_string(),
            max_parallel: 4,
            remote: "origin".to_string(),
            worktree_root: None,
            cleanup_worktrees: true,
            pr_title_template: "Tier {tier}: {tickets}".to_string(),
            tracker_command: vec!["python3".to_string(), "linear.py".to_string()],
            work_command: Vec::new(),
            summary_dir: PathBuf::from(".tierstack/runs"),
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> OrchestratorResult<Self> {
        toml::from_str(s).map_err(|e| OrchestratorError::Config(e.to_string()))
    }

    /// Load `path` when it exists, else defaults; then apply the environment.
    pub fn load(path: Option<&Path>) -> OrchestratorResult<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                debug!(path = %p.display(), "loading config file");
                let text = std::fs::read_to_string(p)?;
                Self::from_toml_str(&text)?
            }
            Some(p) => {
                return Err(OrchestratorError::Config(format!(
                    "config file not found: {}",
                    p.display()
                )))
            }
            None => {
                let default = Path::new(CONFIG_FILE);
                if default.exists() {
                    Self::from_toml_str(&std::fs::read_to_string(default)?)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `TIERSTACK_*` variables resolved by `lookup`.
    ///
    /// Command variables are split on whitespace.
    pub fn apply_env<F>(&mut self, lookup: F) -> OrchestratorResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TIERSTACK_TRUNK") {
            self.trunk = Some(v);
        }
        if let Some(v) = lookup("TIERSTACK_BRANCH_PREFIX") {
            self.branch_prefix = v;
        }
        if let Some(v) = lookup("TIERSTACK_MAX_PARALLEL") {
            self.max_parallel = v.trim().parse().map_err(|_| {
                OrchestratorError::Config(format!("TIERSTACK_MAX_PARALLEL is not a number: {v:?}"))
            })?;
        }
        if let Some(v) = lookup("TIERSTACK_REMOTE") {
            self.remote = v;
        }
        if let Some(v) = lookup("TIERSTACK_WORKTREE_ROOT") {
            self.worktree_root = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TIERSTACK_CLEANUP_WORKTREES") {
            self.cleanup_worktrees = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("TIERSTACK_TRACKER_COMMAND") {
            self.tracker_command = split_command(&v);
        }
        if let Some(v) = lookup("TIERSTACK_WORK_COMMAND") {
            self.work_command = split_command(&v);
        }
        if let Some(v) = lookup("TIERSTACK_SUMMARY_DIR") {
            self.summary_dir = PathBuf::from(v);
        }
        Ok(())
    }

    /// Check invariants that apply to every command.
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.max_parallel == 0 {
            return Err(OrchestratorError::Config(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.branch_prefix.trim().is_empty() {
            return Err(OrchestratorError::Config(
                "branch_prefix must not be empty".to_string(),
            ));
        }
        if self.branch_prefix.chars().any(char::is_whitespace) {
            return Err(OrchestratorError::Config(format!(
                "branch_prefix must not contain whitespace: {:?}",
                self.branch_prefix
            )));
        }
        if self.tracker_command.is_empty() {
            return Err(OrchestratorError::Config(
                "tracker_command must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus the requirements of `run`.
    pub fn validate_for_run(&self) -> OrchestratorResult<()> {
        self.validate()?;
        if self.work_command.is_empty() {
            return Err(OrchestratorError::Config(
                "work_command must be set to run tickets".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the integration PR title for a tier.
    pub fn pr_title(&self, tier: usize, tickets: &[String]) -> String {
        self.pr_title_template
            .replace("{tier}", &tier.to_string())
            .replace("{tickets}", &tickets.join(", "))
    }
}

fn split_command(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid_for_planning() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.branch_prefix, "stack");
        assert_eq!(config.max_parallel, 4);
        config.validate().unwrap();
        assert!(config.validate_for_run().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            branch_prefix = "feat"
            max_parallel = 2
            work_command = ["make", "implement"]
            "#,
        )
        .unwrap();
        assert_eq!(config.branch_prefix, "feat");
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.remote, "origin");
        config.validate_for_run().unwrap();
    }

    #[test]
    fn test_unknown_toml_type_is_config_error() {
        let err = OrchestratorConfig::from_toml_str("max_parallel = \"lots\"").unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("TIERSTACK_MAX_PARALLEL", "8"),
            ("TIERSTACK_WORK_COMMAND", "sh -c ./implement.sh"),
            ("TIERSTACK_TRUNK", "develop"),
        ]
        .into_iter()
        .collect();
        let mut config = OrchestratorConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.work_command, vec!["sh", "-c", "./implement.sh"]);
        assert_eq!(config.trunk.as_deref(), Some("develop"));
    }

    #[test]
    fn test_bad_env_number_is_rejected() {
        let mut config = OrchestratorConfig::default();
        let err = config
            .apply_env(|k| (k == "TIERSTACK_MAX_PARALLEL").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero = OrchestratorConfig {
            max_parallel: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let spaced = OrchestratorConfig {
            branch_prefix: "my stack".to_string(),
            ..Default::default()
        };
        assert!(spaced.validate().is_err());

        let empty = OrchestratorConfig {
            branch_prefix: String::new(),
            ..Default::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = OrchestratorConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn test_pr_title_template() {
        let config = OrchestratorConfig::default();
        assert_eq!(
            config.pr_title(1, &["ENG-3".to_string(), "ENG-4".to_string()]),
            "Tier 1: ENG-3, ENG-4"
        );
    }
}
