//! The workflow controller: a finite-state machine sequencing role-specific
//! generation calls with bounded retries and external verification.
//!
//! Phase order is fixed: PLANNING → GENERATE_TESTS → CODING → REFACTORING →
//! AUDIT → DONE, with FAILED reachable from the three retrying phases. The
//! same retry budget R bounds planning, coding, and refactoring
//! independently, each with a fresh counter.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use crate::context::{WorkflowContext, WorkflowState};
use crate::errors::WorkflowError;
use crate::experience::{self, ExperienceStore};
use crate::persona::{self, AgentExecutor, AgentPersona};
use crate::util::{strip_code_fences, truncate_for_prompt};
use crate::verify::{LintOutcome, Verifier};

/// Token the Validator must emit (as a case-insensitive substring) for a
/// plan to be accepted.
pub const APPROVAL_TOKEN: &str = "APPROVED";

/// Max bytes of repository summary injected into the planning prompt.
const MAP_PROMPT_BYTES: usize = 4000;

pub const PLAN_FILE: &str = "plan.yaml";
pub const HARNESS_FILE: &str = "test_harness.py";
pub const SOLUTION_FILE: &str = "solution.py";
pub const REVIEW_FILE: &str = "review.md";

/// How the refactoring phase resolved.
enum RefactorResult {
    /// Lint clean, budget exhausted with passing tests, or no lint tool:
    /// proceed to audit.
    Proceed,
    /// A rewrite broke the tests. Hard stop.
    Regressed,
}

pub struct WorkflowController<'a> {
    executor: &'a AgentExecutor,
    verifier: &'a dyn Verifier,
    retry_budget: u32,
    run_dir: PathBuf,
}

impl<'a> WorkflowController<'a> {
    pub fn new(
        executor: &'a AgentExecutor,
        verifier: &'a dyn Verifier,
        retry_budget: u32,
        run_dir: PathBuf,
    ) -> Self {
        Self {
            executor,
            verifier,
            retry_budget,
            run_dir,
        }
    }

    /// Drive one task execution to a terminal state. Returns the terminal
    /// state reached; generation failures propagate as fatal errors without
    /// recording an experience.
    pub async fn execute(
        &self,
        ctx: &mut WorkflowContext,
        store: &mut ExperienceStore,
    ) -> Result<WorkflowState, WorkflowError> {
        fs::create_dir_all(&self.run_dir)
            .context("Failed to create run workspace")
            .map_err(WorkflowError::Other)?;

        info!(task = %ctx.task, target = %ctx.target, "workflow started");

        if !self.run_planning(ctx).await? {
            warn!("planning budget exhausted without approval");
            return self.fail(ctx, store);
        }

        ctx.state = WorkflowState::GenerateTests;
        self.run_generate_tests(ctx).await?;

        ctx.state = WorkflowState::Coding;
        if !self.run_coding(ctx).await? {
            warn!("coding budget exhausted, last attempt still failing");
            return self.fail(ctx, store);
        }

        ctx.state = WorkflowState::Refactoring;
        if let RefactorResult::Regressed = self.run_refactoring(ctx).await? {
            warn!("refactor rewrite regressed the tests");
            return self.fail(ctx, store);
        }

        ctx.state = WorkflowState::Audit;
        self.run_audit(ctx).await?;

        ctx.state = WorkflowState::Done;
        store
            .record(&ctx.task, true, &ctx.solution)
            .map_err(WorkflowError::Other)?;
        info!("workflow done");
        Ok(WorkflowState::Done)
    }

    fn fail(
        &self,
        ctx: &mut WorkflowContext,
        store: &mut ExperienceStore,
    ) -> Result<WorkflowState, WorkflowError> {
        ctx.state = WorkflowState::Failed;
        // The last-produced solution is recorded even when failing; during
        // planning it is still empty.
        store
            .record(&ctx.task, false, &ctx.solution)
            .map_err(WorkflowError::Other)?;
        Ok(WorkflowState::Failed)
    }

    /// PLANNING: Architect proposes, Validator approves or critiques, up to
    /// R rounds. The previous round's critique feeds the next proposal.
    async fn run_planning(&self, ctx: &mut WorkflowContext) -> Result<bool, WorkflowError> {
        for attempt in 1..=self.retry_budget {
            info!(attempt, budget = self.retry_budget, "planning round");

            let mut prompt = format!(
                "## PRIOR EXPERIENCE\n{}\n\n## REPOSITORY MAP\n{}\n\n## TARGET\n{}\n\n## TASK\n{}\n",
                experience::format_for_prompt(&ctx.experiences),
                truncate_for_prompt(&ctx.repository_summary, MAP_PROMPT_BYTES),
                ctx.target,
                ctx.task,
            );
            if !ctx.critique.is_empty() {
                prompt.push_str(&format!(
                    "\n## REVIEWER CRITIQUE OF YOUR PREVIOUS PLAN\n{}\n",
                    ctx.critique
                ));
            }
            prompt.push_str("\nCreate the execution plan.");

            let plan = self.call(persona::ARCHITECT, WorkflowState::Planning, &prompt).await?;

            let review_prompt = format!(
                "Task:\n{}\n\nProposed plan:\n{}\n\nRespond {} or critique.",
                ctx.task, plan, APPROVAL_TOKEN
            );
            let verdict = self
                .call(persona::VALIDATOR, WorkflowState::Planning, &review_prompt)
                .await?;

            if verdict
                .to_lowercase()
                .contains(&APPROVAL_TOKEN.to_lowercase())
            {
                ctx.plan = strip_code_fences(&plan);
                ctx.critique.clear();
                self.persist(PLAN_FILE, &ctx.plan)?;
                info!(attempt, "plan approved");
                return Ok(true);
            }
            ctx.critique = verdict;
        }
        Ok(false)
    }

    /// GENERATE_TESTS: one unconditional QA call; no retries.
    async fn run_generate_tests(&self, ctx: &mut WorkflowContext) -> Result<(), WorkflowError> {
        let prompt = format!(
            "Approved plan:\n{}\n\nTask:\n{}\n\nWrite the verification script. It must fail \
             while the feature is absent and pass once it is implemented.",
            ctx.plan, ctx.task
        );
        let script = self
            .call(persona::QA, WorkflowState::GenerateTests, &prompt)
            .await?;
        ctx.test_harness = strip_code_fences(&script);
        self.persist(HARNESS_FILE, &ctx.test_harness)?;
        info!("test harness generated");
        Ok(())
    }

    /// CODING: reflexion loop. Attempt 1 is the Coder with plan and tests;
    /// later attempts are the Debugger with the previous error log and
    /// tests. The plan is not re-supplied.
    async fn run_coding(&self, ctx: &mut WorkflowContext) -> Result<bool, WorkflowError> {
        let harness_path = self.run_dir.join(HARNESS_FILE);
        for attempt in 1..=self.retry_budget {
            info!(attempt, budget = self.retry_budget, "coding attempt");

            let raw = if attempt == 1 {
                let prompt = format!(
                    "Plan:\n{}\n\nVerification script:\n{}\n\nWrite the full solution for {}.",
                    ctx.plan, ctx.test_harness, ctx.target
                );
                self.call(persona::CODER, WorkflowState::Coding, &prompt).await?
            } else {
                let prompt = format!(
                    "The previous solution failed verification.\n\nError output:\n{}\n\n\
                     Verification script:\n{}\n\nRewrite the full solution.",
                    ctx.error_log, ctx.test_harness
                );
                self.call(persona::DEBUGGER, WorkflowState::Coding, &prompt).await?
            };

            ctx.solution = strip_code_fences(&raw);
            self.persist(SOLUTION_FILE, &ctx.solution)?;

            let outcome = self.verifier.run_tests(&harness_path, &self.run_dir).await;
            if outcome.success() {
                info!(attempt, "verification passed");
                return Ok(true);
            }
            ctx.error_log = outcome.combined_output();
            warn!(attempt, exit = outcome.exit_code, "verification failed");
        }
        Ok(false)
    }

    /// REFACTORING: lint-fix loop. A clean lint proceeds immediately; a
    /// rewrite that breaks the tests is a hard stop; exhausting the budget
    /// with lint issues but passing tests soft-fails into audit.
    async fn run_refactoring(
        &self,
        ctx: &mut WorkflowContext,
    ) -> Result<RefactorResult, WorkflowError> {
        let harness_path = self.run_dir.join(HARNESS_FILE);
        let solution_path = self.run_dir.join(SOLUTION_FILE);

        for attempt in 1..=self.retry_budget {
            let report = match self.verifier.run_lint(&solution_path, &self.run_dir).await {
                LintOutcome::Clean => {
                    info!(attempt, "lint clean");
                    return Ok(RefactorResult::Proceed);
                }
                LintOutcome::Issues(report) => report,
            };
            info!(attempt, "lint reported issues, rewriting");

            let prompt = format!(
                "Lint report:\n{}\n\nCurrent solution:\n{}\n\nRewrite the solution to resolve \
                 the lint issues without changing behavior.",
                report, ctx.solution
            );
            let rewritten = self
                .call(persona::REFACTOR, WorkflowState::Refactoring, &prompt)
                .await?;
            ctx.solution = strip_code_fences(&rewritten);
            self.persist(SOLUTION_FILE, &ctx.solution)?;

            // Guard against regressions with the test harness, not the linter.
            let rerun = self.verifier.run_tests(&harness_path, &self.run_dir).await;
            if !rerun.success() {
                ctx.error_log = rerun.combined_output();
                return Ok(RefactorResult::Regressed);
            }
        }
        info!("refactor budget exhausted with lint issues remaining, proceeding");
        Ok(RefactorResult::Proceed)
    }

    /// AUDIT: one unconditional review call.
    async fn run_audit(&self, ctx: &mut WorkflowContext) -> Result<(), WorkflowError> {
        let prompt = format!(
            "Task:\n{}\n\nFinal solution:\n{}\n\nReview for correctness, security, and style.",
            ctx.task, ctx.solution
        );
        let critique = self
            .call(persona::AUDITOR, WorkflowState::Audit, &prompt)
            .await?;
        ctx.critique = strip_code_fences(&critique);
        self.persist(REVIEW_FILE, &ctx.critique)?;
        Ok(())
    }

    async fn call(
        &self,
        p: AgentPersona,
        phase: WorkflowState,
        prompt: &str,
    ) -> Result<String, WorkflowError> {
        self.executor
            .run(p, phase, prompt)
            .await
            .map_err(|e| WorkflowError::generation(p.role, phase, e))
    }

    fn persist(&self, name: &str, content: &str) -> Result<(), WorkflowError> {
        let path = self.run_dir.join(name);
        fs::write(&path, content)
            .with_context(|| format!("Failed to write artifact {}", path.display()))
            .map_err(WorkflowError::Other)
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.run_dir.join(name)
    }
}

/// Read a persisted artifact back from a run directory.
pub fn read_artifact(run_dir: &Path, name: &str) -> anyhow::Result<String> {
    let path = run_dir.join(name);
    fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
}
