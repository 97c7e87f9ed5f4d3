//! Benchmark harness: replays a suite of tasks through the agent binary and
//! scores each with an external validation script.
//!
//! Each task's target file is backed up before the run and restored after,
//! so the suite can be replayed repeatedly against the same tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

/// One benchmark task definition, loaded from `tasks.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct BenchTask {
    pub id: String,
    pub target_file: PathBuf,
    pub instruction: String,
    /// Script executed after the agent run; exit 0 means the task passed.
    pub validation_test: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct BenchResult {
    pub id: String,
    pub success: bool,
    pub duration_secs: f64,
    pub agent_stdout: String,
    pub agent_stderr: String,
    pub validation_stderr: String,
}

pub fn load_tasks(path: &Path) -> Result<Vec<BenchTask>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read benchmark suite {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse benchmark suite {}", path.display()))
}

pub fn write_report(path: &Path, results: &[BenchResult]) -> Result<()> {
    let json =
        serde_json::to_string_pretty(results).context("Failed to serialize benchmark report")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write benchmark report {}", path.display()))?;
    Ok(())
}

/// Runs benchmark tasks sequentially via subprocesses.
pub struct BenchRunner {
    /// Command prefix invoked as `<agent_cmd...> <target> <instruction>`.
    agent_cmd: Vec<String>,
    /// Interpreter for validation scripts.
    interpreter: String,
}

impl BenchRunner {
    pub fn new(agent_cmd: Vec<String>, interpreter: &str) -> Self {
        Self {
            agent_cmd,
            interpreter: interpreter.to_string(),
        }
    }

    pub async fn run_suite(&self, tasks: &[BenchTask]) -> Result<Vec<BenchResult>> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            info!(id = %task.id, "running benchmark task");
            results.push(self.run_task(task).await?);
        }
        Ok(results)
    }

    async fn run_task(&self, task: &BenchTask) -> Result<BenchResult> {
        let backup = task.target_file.with_extension("bak");
        fs::copy(&task.target_file, &backup).with_context(|| {
            format!("Failed to back up target {}", task.target_file.display())
        })?;

        let start = Instant::now();
        let agent = self.spawn_agent(task).await;
        let duration = start.elapsed().as_secs_f64();

        let (agent_stdout, agent_stderr) = match agent {
            Ok(out) => (
                String::from_utf8_lossy(&out.stdout).into_owned(),
                String::from_utf8_lossy(&out.stderr).into_owned(),
            ),
            Err(e) => {
                warn!(id = %task.id, error = %e, "agent invocation failed");
                (String::new(), e.to_string())
            }
        };

        let validation = Command::new(&self.interpreter)
            .arg(&task.validation_test)
            .output()
            .await;
        let (success, validation_stderr) = match validation {
            Ok(out) => (
                out.status.success(),
                String::from_utf8_lossy(&out.stderr).into_owned(),
            ),
            Err(e) => (false, e.to_string()),
        };

        // Put the tree back the way we found it.
        fs::rename(&backup, &task.target_file).with_context(|| {
            format!("Failed to restore target {}", task.target_file.display())
        })?;

        Ok(BenchResult {
            id: task.id.clone(),
            success,
            duration_secs: duration,
            agent_stdout,
            agent_stderr,
            validation_stderr,
        })
    }

    async fn spawn_agent(&self, task: &BenchTask) -> Result<std::process::Output> {
        let (program, rest) = self
            .agent_cmd
            .split_first()
            .context("Benchmark agent command is empty")?;
        Command::new(program)
            .args(rest)
            .arg(&task.target_file)
            .arg(&task.instruction)
            .output()
            .await
            .with_context(|| format!("Failed to spawn agent command {:?}", program))
    }
}

/// One-line pass/fail tally for console output.
pub fn summarize(results: &[BenchResult]) -> String {
    let passed = results.iter().filter(|r| r.success).count();
    format!("{}/{} tasks passed", passed, results.len())
}
