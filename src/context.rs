//! The mutable scratchpad threaded through all workflow phases.

use serde::{Deserialize, Serialize};

use crate::experience::ExperienceRecord;

/// The closed set of workflow states. Transitions between them are owned
/// exclusively by the controller; illegal states are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Planning,
    GenerateTests,
    Coding,
    Refactoring,
    Audit,
    Done,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Planning => "planning",
            WorkflowState::GenerateTests => "generate_tests",
            WorkflowState::Coding => "coding",
            WorkflowState::Refactoring => "refactoring",
            WorkflowState::Audit => "audit",
            WorkflowState::Done => "done",
            WorkflowState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-execution scratchpad. One instance per task, owned and mutated only
/// by the controller. Fields are populated monotonically within a phase so
/// later phases always see earlier artifacts.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    /// The validated natural-language task.
    pub task: String,
    /// Identifier of the artifact being modified (a path, typically).
    pub target: String,
    /// Serialized repository summary injected into planning prompts.
    pub repository_summary: String,
    /// Past records retrieved for this task, most relevant first.
    pub experiences: Vec<ExperienceRecord>,
    /// Approved execution plan.
    pub plan: String,
    /// Generated verification script.
    pub test_harness: String,
    /// Current candidate solution (fence-stripped).
    pub solution: String,
    /// Validator critique (during planning) or auditor review (at the end).
    pub critique: String,
    /// Combined stderr/stdout from the last failed verification run.
    pub error_log: String,
    pub state: WorkflowState,
}

impl WorkflowContext {
    pub fn new(task: String, target: String) -> Self {
        Self {
            task,
            target,
            repository_summary: String::new(),
            experiences: Vec::new(),
            plan: String::new(),
            test_harness: String::new(),
            solution: String::new(),
            critique: String::new(),
            error_log: String::new(),
            state: WorkflowState::Planning,
        }
    }
}
