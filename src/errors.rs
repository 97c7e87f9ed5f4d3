//! Typed error hierarchy for the anvil orchestrator.
//!
//! Three top-level enums cover the three failure domains:
//! - `ValidationError`: task text rejected before any workflow state exists
//! - `RouterError`: completion routing failures after fallback exhaustion
//! - `WorkflowError`: fatal aborts surfaced out of the controller
//!
//! Verification failures are deliberately absent: a nonzero exit or timeout
//! from the test harness is ordinary data that drives the retry loops, not
//! an error type.

use thiserror::Error;

use crate::context::WorkflowState;

/// Errors raised by the input gate, before the workflow starts.
/// Never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Task text is {length} chars, exceeding the {max} char limit")]
    TooLong { length: usize, max: usize },

    #[error("Task text contains a deny-listed phrase: {phrase:?}")]
    PromptInjection { phrase: String },
}

/// Errors from the model router. Raised only after the designated fallback
/// tier has also failed; a primary-tier failure alone is absorbed by the
/// single-hop fallback retry.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Completion failed for role {role} on {tier} and fallback {fallback}: {detail}")]
    Exhausted {
        role: String,
        tier: String,
        fallback: String,
        detail: String,
    },
}

/// Fatal errors that abort a whole task execution and roll back the sandbox.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Generation failed for role {role} during {phase}: {detail}")]
    Generation {
        role: String,
        phase: WorkflowState,
        detail: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Wrap a router failure with the phase it occurred in.
    pub fn generation(role: &str, phase: WorkflowState, err: RouterError) -> Self {
        WorkflowError::Generation {
            role: role.to_string(),
            phase,
            detail: err.to_string(),
        }
    }
}
