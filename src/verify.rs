//! The test/lint execution boundary.
//!
//! Verification outcomes are data, not errors: a nonzero exit, a timeout,
//! or a failure to even spawn the harness all surface as a failed
//! [`VerifyOutcome`] that drives the retry loops. A missing lint tool
//! degrades to a clean result.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of one test-harness run.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl VerifyOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined stderr-then-stdout capture, fed back to the Debugger.
    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stderr, self.stdout)
    }

    fn synthetic_failure(detail: String) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: detail,
        }
    }
}

/// Result of one lint run. `Clean` covers "no issues", "no linter
/// configured", and "lint tool missing" alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintOutcome {
    Clean,
    Issues(String),
}

/// Abstraction over external verification for testability.
/// Real implementation: [`ProcessVerifier`]. Test double: a scripted queue
/// of outcomes.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Execute the test harness in `cwd` under the wall-clock timeout.
    async fn run_tests(&self, harness: &Path, cwd: &Path) -> VerifyOutcome;

    /// Run the static lint check against the solution file.
    async fn run_lint(&self, solution: &Path, cwd: &Path) -> LintOutcome;
}

/// Runs harnesses and linters as subprocesses.
pub struct ProcessVerifier {
    /// Interpreter invoked on the harness script (e.g. "python3").
    interpreter: String,
    /// Lint command prefix; the solution path is appended. Empty means no
    /// linter is configured.
    lint_cmd: Vec<String>,
    timeout: Duration,
}

impl ProcessVerifier {
    pub fn new(interpreter: &str, lint_cmd: Vec<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            lint_cmd,
            timeout,
        }
    }
}

#[async_trait]
impl Verifier for ProcessVerifier {
    async fn run_tests(&self, harness: &Path, cwd: &Path) -> VerifyOutcome {
        let fut = Command::new(&self.interpreter)
            .arg(harness)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return VerifyOutcome::synthetic_failure(format!(
                    "Failed to run {} {}: {}",
                    self.interpreter,
                    harness.display(),
                    e
                ));
            }
            Err(_) => {
                return VerifyOutcome::synthetic_failure(format!(
                    "Verification timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
        };

        let outcome = VerifyOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(exit = outcome.exit_code, "test harness finished");
        outcome
    }

    async fn run_lint(&self, solution: &Path, cwd: &Path) -> LintOutcome {
        let Some((program, prefix_args)) = self.lint_cmd.split_first() else {
            return LintOutcome::Clean;
        };

        let fut = Command::new(program)
            .args(prefix_args)
            .arg(solution)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(tool = %program, error = %e, "lint tool unavailable, treating as clean");
                return LintOutcome::Clean;
            }
            Err(_) => {
                warn!(tool = %program, "lint run timed out, treating as clean");
                return LintOutcome::Clean;
            }
        };

        if output.status.success() {
            return LintOutcome::Clean;
        }
        let report = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if report.trim().is_empty() {
            LintOutcome::Clean
        } else {
            LintOutcome::Issues(report)
        }
    }
}
