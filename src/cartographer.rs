//! Static repository summarization.
//!
//! Walks the project tree, extracts lightweight signature summaries per
//! source file plus a truncated content snippet, and persists the result
//! as `repo_map.json`. The map seeds the planner's repository context.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

const IGNORE_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "__pycache__",
    "venv",
    ".anvil",
];

const TARGET_EXTENSIONS: &[&str] = &["py", "rs", "js", "ts", "java", "go", "md"];

const SNIPPET_BYTES: usize = 500;

/// Summary of one mapped file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSummary {
    pub summary: Vec<String>,
    pub snippet: String,
}

/// Full repository map keyed by path relative to the root.
pub type RepoMap = BTreeMap<String, FileSummary>;

pub struct RepoCartographer {
    root: PathBuf,
}

impl RepoCartographer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Walk the tree and build the map.
    pub fn map_repo(&self) -> Result<RepoMap> {
        info!(root = %self.root.display(), "mapping repository");
        let mut map = RepoMap::new();

        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|e| {
            // The root itself is always walked, whatever its name.
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !(e.file_type().is_dir()
                && (IGNORE_DIRS.contains(&name.as_ref()) || name.starts_with('.')))
        });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            if !TARGET_EXTENSIONS.contains(&ext) {
                continue;
            }

            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();

            let mut snippet_end = content.len().min(SNIPPET_BYTES);
            while !content.is_char_boundary(snippet_end) {
                snippet_end -= 1;
            }
            map.insert(
                rel,
                FileSummary {
                    summary: extract_signatures(&content, ext),
                    snippet: content[..snippet_end].to_string(),
                },
            );
        }

        info!(files = map.len(), "repository map built");
        Ok(map)
    }

    /// Build the map and write it to `map_file` as JSON.
    pub fn export(&self, map_file: &Path) -> Result<RepoMap> {
        let map = self.map_repo()?;
        if let Some(parent) = map_file.parent() {
            fs::create_dir_all(parent).context("Failed to create map directory")?;
        }
        let json = serde_json::to_string_pretty(&map).context("Failed to serialize repo map")?;
        fs::write(map_file, json)
            .with_context(|| format!("Failed to write {}", map_file.display()))?;
        Ok(map)
    }
}

/// Load an existing map, or build and persist it when absent.
pub fn load_or_map(root: &Path, map_file: &Path) -> Result<RepoMap> {
    if map_file.exists() {
        let content = fs::read_to_string(map_file)
            .with_context(|| format!("Failed to read {}", map_file.display()))?;
        return serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", map_file.display()));
    }
    RepoCartographer::new(root).export(map_file)
}

/// Extract top-level definition signatures by extension.
fn extract_signatures(content: &str, ext: &str) -> Vec<String> {
    let pattern = match ext {
        "py" => r"(?m)^\s*(def|class)\s+(\w+)",
        "rs" => r"(?m)^\s*(?:pub(?:\(\w+\))?\s+)?(fn|struct|enum|trait)\s+(\w+)",
        "js" | "ts" => r"(?m)^\s*(?:export\s+)?(?:default\s+)?(function|class)\s+(\w+)",
        "java" | "go" => r"(?m)^\s*(?:public\s+)?(func|class|interface)\s+(\w+)",
        _ => return vec!["(File Content)".to_string()],
    };
    // Patterns above are literals; compilation cannot fail.
    let re = Regex::new(pattern).expect("invalid signature pattern");
    let mut sigs: Vec<String> = re
        .captures_iter(content)
        .map(|cap| {
            let kind = cap.get(1).map(|m| m.as_str()).unwrap_or("def");
            let name = cap.get(2).map(|m| m.as_str()).unwrap_or("?");
            format!("{}: {}", kind_label(kind), name)
        })
        .collect();
    if sigs.is_empty() {
        sigs.push("(No definitions)".to_string());
    }
    sigs
}

fn kind_label(kind: &str) -> &'static str {
    match kind {
        "def" | "fn" | "function" | "func" => "Function",
        "class" | "struct" => "Class",
        "enum" => "Enum",
        "trait" | "interface" => "Trait",
        _ => "Definition",
    }
}
