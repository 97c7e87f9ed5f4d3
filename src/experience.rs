//! Cross-run memory of past task attempts.
//!
//! The store is an append-only JSON log loaded in full at process start and
//! rewritten in full on every `record` call. Retrieval is deliberately
//! naive keyword overlap, with no embeddings and no randomness, so results
//! are reproducible across runs.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One persisted outcome. Immutable once written; failed attempts are
/// recorded with an empty or partial solution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperienceRecord {
    pub timestamp: DateTime<Utc>,
    pub task: String,
    pub success: bool,
    pub solution: String,
}

/// Process-wide append-only experience log.
pub struct ExperienceStore {
    path: PathBuf,
    records: Vec<ExperienceRecord>,
}

impl ExperienceStore {
    /// Load the full log from disk. A missing file is an empty log.
    pub fn load(path: &Path) -> Result<Self> {
        let records = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read experience log {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse experience log {}", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Append one record and persist the whole log.
    pub fn record(&mut self, task: &str, success: bool, solution: &str) -> Result<()> {
        self.records.push(ExperienceRecord {
            timestamp: Utc::now(),
            task: task.to_string(),
            success,
            solution: solution.to_string(),
        });
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create experience log directory")?;
        }
        let json = serde_json::to_string_pretty(&self.records)
            .context("Failed to serialize experience log")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write experience log {}", self.path.display()))?;
        debug!(total = self.records.len(), success, "recorded experience");
        Ok(())
    }

    /// Retrieve the top-k most lexically similar past records.
    ///
    /// Score = size of the intersection of case-folded whitespace word sets.
    /// Zero-score records are discarded; ties keep insertion order (stable
    /// sort); at most k records are returned.
    pub fn retrieve(&self, task: &str, k: usize) -> Vec<ExperienceRecord> {
        let query = word_set(task);
        let mut scored: Vec<(usize, &ExperienceRecord)> = self
            .records
            .iter()
            .map(|r| (word_set(&r.task).intersection(&query).count(), r))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(k).map(|(_, r)| r.clone()).collect()
    }

    pub fn records(&self) -> &[ExperienceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect()
}

/// Format retrieved records into a prompt snippet for the planner.
pub fn format_for_prompt(records: &[ExperienceRecord]) -> String {
    if records.is_empty() {
        return "No prior experience for similar tasks.".to_string();
    }
    let mut out = String::new();
    for r in records {
        let outcome = if r.success { "succeeded" } else { "failed" };
        out.push_str(&format!(
            "- [{}] task: {} (attempt {})\n",
            outcome, r.task, r.timestamp.format("%Y-%m-%d")
        ));
    }
    out
}
