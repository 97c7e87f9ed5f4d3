//! Runtime configuration for anvil.
//!
//! Defaults cover a working setup; `.anvil/config.toml` in the project
//! directory overrides individual values section by section, and the API
//! key comes from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::router::ModelRoster;

/// Runtime configuration assembled from defaults, the project's config
/// file, and CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    /// Per-run artifact workspaces live under here.
    pub workspace_dir: PathBuf,
    pub map_file: PathBuf,
    pub experience_file: PathBuf,
    /// Retry budget R, applied independently to planning, coding, and
    /// refactoring.
    pub retry_budget: u32,
    /// Number of past experiences injected into planning prompts.
    pub experience_k: usize,
    pub verify_timeout: Duration,
    /// Interpreter invoked on generated harness scripts.
    pub interpreter: String,
    /// Lint command prefix; empty disables linting.
    pub lint_cmd: Vec<String>,
    pub roster: ModelRoster,
    pub cloud_base_url: String,
    pub local_base_url: String,
    pub api_key: Option<String>,
    pub verbose: bool,
}

/// Raw TOML structure for `.anvil/config.toml`.
#[derive(Debug, Deserialize, Default)]
struct ConfigToml {
    workflow: Option<WorkflowSection>,
    verify: Option<VerifySection>,
    models: Option<ModelsSection>,
}

#[derive(Debug, Deserialize, Default)]
struct WorkflowSection {
    retry_budget: Option<u32>,
    experience_k: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct VerifySection {
    timeout_secs: Option<u64>,
    interpreter: Option<String>,
    lint_cmd: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsSection {
    reasoning: Option<String>,
    skilled: Option<String>,
    fast: Option<String>,
    fallback: Option<String>,
    cloud_base_url: Option<String>,
    local_base_url: Option<String>,
}

impl Config {
    /// Build configuration for a project directory, overlaying
    /// `.anvil/config.toml` when present.
    pub fn new(project_dir: PathBuf, retry_budget: Option<u32>, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let anvil_dir = project_dir.join(".anvil");

        let toml_cfg = Self::load_toml(&anvil_dir.join("config.toml"))?;
        let workflow = toml_cfg.workflow.unwrap_or_default();
        let verify = toml_cfg.verify.unwrap_or_default();
        let models = toml_cfg.models.unwrap_or_default();

        let mut roster = ModelRoster::default();
        if let Some(m) = models.reasoning {
            roster.reasoning = m;
        }
        if let Some(m) = models.skilled {
            roster.skilled = m;
        }
        if let Some(m) = models.fast {
            roster.fast = m;
        }
        if let Some(m) = models.fallback {
            roster.fallback = m;
        }

        Ok(Self {
            workspace_dir: anvil_dir.join("workspace"),
            map_file: anvil_dir.join("repo_map.json"),
            experience_file: anvil_dir.join("experience.json"),
            retry_budget: retry_budget
                .or(workflow.retry_budget)
                .unwrap_or(3),
            experience_k: workflow.experience_k.unwrap_or(3),
            verify_timeout: Duration::from_secs(verify.timeout_secs.unwrap_or(10)),
            interpreter: verify.interpreter.unwrap_or_else(|| "python3".to_string()),
            lint_cmd: verify.lint_cmd.unwrap_or_default(),
            roster,
            cloud_base_url: models
                .cloud_base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            local_base_url: models
                .local_base_url
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            verbose,
            project_dir,
        })
    }

    fn load_toml(path: &Path) -> Result<ConfigToml> {
        if !path.exists() {
            return Ok(ConfigToml::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Workspace directory for one run.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.workspace_dir.join(run_id)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.workspace_dir)
            .context("Failed to create workspace directory")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_config_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.experience_k, 3);
        assert_eq!(config.verify_timeout, Duration::from_secs(10));
        assert_eq!(config.interpreter, "python3");
        assert!(config.lint_cmd.is_empty());
        assert_eq!(config.roster.reasoning, "gpt-4o");
        assert!(config.map_file.ends_with(".anvil/repo_map.json"));
    }

    #[test]
    fn test_cli_retry_budget_overrides_default() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), Some(5), true).unwrap();
        assert_eq!(config.retry_budget, 5);
        assert!(config.verbose);
    }

    #[test]
    fn test_config_toml_overlay() {
        let dir = tempdir().unwrap();
        let anvil_dir = dir.path().join(".anvil");
        fs::create_dir_all(&anvil_dir).unwrap();
        fs::write(
            anvil_dir.join("config.toml"),
            r#"
[workflow]
retry_budget = 7
experience_k = 5

[verify]
timeout_secs = 30
interpreter = "python"
lint_cmd = ["ruff", "check"]

[models]
skilled = "ollama/codellama:13b"
local_base_url = "http://127.0.0.1:11434"
"#,
        )
        .unwrap();

        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        assert_eq!(config.retry_budget, 7);
        assert_eq!(config.experience_k, 5);
        assert_eq!(config.verify_timeout, Duration::from_secs(30));
        assert_eq!(config.lint_cmd, vec!["ruff", "check"]);
        assert_eq!(config.roster.skilled, "ollama/codellama:13b");
        // Untouched sections keep defaults.
        assert_eq!(config.roster.reasoning, "gpt-4o");
        assert_eq!(config.local_base_url, "http://127.0.0.1:11434");
    }

    #[test]
    fn test_cli_flag_beats_toml_budget() {
        let dir = tempdir().unwrap();
        let anvil_dir = dir.path().join(".anvil");
        fs::create_dir_all(&anvil_dir).unwrap();
        fs::write(anvil_dir.join("config.toml"), "[workflow]\nretry_budget = 7\n").unwrap();
        let config = Config::new(dir.path().to_path_buf(), Some(2), false).unwrap();
        assert_eq!(config.retry_budget, 2);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempdir().unwrap();
        let anvil_dir = dir.path().join(".anvil");
        fs::create_dir_all(&anvil_dir).unwrap();
        fs::write(anvil_dir.join("config.toml"), "not valid toml {{{{").unwrap();
        assert!(Config::new(dir.path().to_path_buf(), None, false).is_err());
    }

    #[test]
    fn test_run_dir_nests_under_workspace() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), None, false).unwrap();
        let run = config.run_dir("run-1");
        assert!(run.starts_with(&config.workspace_dir));
    }
}
