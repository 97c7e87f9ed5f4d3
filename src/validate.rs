//! Input gate applied to raw task text before the workflow starts.

use crate::errors::ValidationError;

/// Maximum accepted task length in characters.
pub const MAX_TASK_LEN: usize = 2000;

/// Prompt-manipulation phrases rejected from task text. Matched
/// case-insensitively, anywhere in the input.
const DENY_LIST: &[&str] = &[
    "ignore previous",
    "ignore all previous",
    "disregard the above",
    "system:",
    "act as",
    "you are a",
    "new instructions",
    "developer mode",
];

/// Validate raw task text.
///
/// Rule order is fixed: length first, then the deny-list scan. A too-long
/// input fails with `TooLong` even when it also contains a deny-listed
/// phrase.
pub fn validate(text: &str) -> Result<&str, ValidationError> {
    let length = text.chars().count();
    if length > MAX_TASK_LEN {
        return Err(ValidationError::TooLong {
            length,
            max: MAX_TASK_LEN,
        });
    }
    let lowered = text.to_lowercase();
    for phrase in DENY_LIST {
        if lowered.contains(phrase) {
            return Err(ValidationError::PromptInjection {
                phrase: phrase.to_string(),
            });
        }
    }
    Ok(text)
}
