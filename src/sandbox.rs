//! Branch-based git isolation for one task execution.
//!
//! The controller's run is bracketed by exactly one `open` and exactly one
//! `finalize` or `abandon`. [`SandboxGuard`] enforces the bracket: unless
//! explicitly finalized, dropping the guard abandons the sandbox, so every
//! non-success exit path (including panics and fatal generation errors)
//! rolls back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use git2::{BranchType, Repository, Signature, StashFlags, StatusOptions, build::CheckoutBuilder};
use tracing::{info, warn};

use crate::util::slugify;

/// Identity of an open sandbox: the isolation branch and the ref to return
/// to on abandon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxId {
    pub branch: String,
    pub original_ref: String,
}

/// The three-operation sandbox contract the controller depends on.
pub trait SafetyGate: Send + Sync {
    /// Create and check out an isolation branch for the task.
    fn open(&self, task: &str) -> Result<SandboxId>;

    /// Commit all changes on the isolation branch. Called only on success.
    fn finalize(&self, id: &SandboxId, message: &str) -> Result<()>;

    /// Return to the original ref and delete the isolation branch.
    fn abandon(&self, id: &SandboxId) -> Result<()>;
}

/// Git implementation of the safety gate.
pub struct GitSandbox {
    repo_dir: PathBuf,
}

impl GitSandbox {
    pub fn new(repo_dir: &Path) -> Self {
        Self {
            repo_dir: repo_dir.to_path_buf(),
        }
    }

    fn open_repo(&self) -> Result<Repository> {
        Repository::open(&self.repo_dir).with_context(|| {
            format!("Failed to open git repository at {}", self.repo_dir.display())
        })
    }

    fn signature() -> Result<Signature<'static>> {
        Signature::now("anvil", "anvil@localhost").context("Failed to create git signature")
    }

    fn is_dirty(repo: &Repository) -> Result<bool> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true);
        let statuses = repo
            .statuses(Some(&mut opts))
            .context("Failed to read repository status")?;
        Ok(!statuses.is_empty())
    }
}

impl SafetyGate for GitSandbox {
    fn open(&self, task: &str) -> Result<SandboxId> {
        let mut repo = self.open_repo()?;

        let original_ref = repo
            .head()
            .context("Repository has no HEAD; commit something first")?
            .shorthand()
            .ok_or_else(|| anyhow!("HEAD is not a named branch"))?
            .to_string();

        // Stash a dirty tree so the isolation branch starts clean.
        if Self::is_dirty(&repo)? {
            let sig = Self::signature()?;
            repo.stash_save(&sig, "anvil safety stash", Some(StashFlags::INCLUDE_UNTRACKED))
                .context("Failed to stash dirty working tree")?;
            info!("stashed dirty working tree before sandboxing");
        }

        let branch = format!(
            "anvil/{}-{}",
            slugify(task, 20),
            Utc::now().format("%H%M%S")
        );

        let head_commit = repo
            .head()?
            .peel_to_commit()
            .context("Failed to resolve HEAD commit")?;
        repo.branch(&branch, &head_commit, false)
            .with_context(|| format!("Failed to create branch {}", branch))?;
        repo.set_head(&format!("refs/heads/{}", branch))?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))
            .context("Failed to check out sandbox branch")?;

        info!(branch = %branch, from = %original_ref, "opened sandbox");
        Ok(SandboxId {
            branch,
            original_ref,
        })
    }

    fn finalize(&self, id: &SandboxId, message: &str) -> Result<()> {
        let repo = self.open_repo()?;

        let mut index = repo.index()?;
        // Run artifacts and the experience log stay out of the commit.
        index.add_all(
            ["*"].iter(),
            git2::IndexAddOption::DEFAULT,
            Some(&mut |path: &Path, _spec: &[u8]| {
                if path.starts_with(".anvil") { 1 } else { 0 }
            }),
        )?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = Self::signature()?;

        let parent = repo.head()?.peel_to_commit()?;
        repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &format!("anvil: {}", message),
            &tree,
            &[&parent],
        )
        .context("Failed to commit sandbox changes")?;

        info!(branch = %id.branch, "finalized sandbox");
        Ok(())
    }

    fn abandon(&self, id: &SandboxId) -> Result<()> {
        let repo = self.open_repo()?;

        repo.set_head(&format!("refs/heads/{}", id.original_ref))
            .with_context(|| format!("Failed to return to {}", id.original_ref))?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))
            .context("Failed to check out original ref")?;

        repo.find_branch(&id.branch, BranchType::Local)
            .with_context(|| format!("Sandbox branch {} missing", id.branch))?
            .delete()
            .with_context(|| format!("Failed to delete branch {}", id.branch))?;

        info!(branch = %id.branch, back_to = %id.original_ref, "abandoned sandbox");
        Ok(())
    }
}

/// Scoped acquisition of a sandbox. Abandons on drop unless finalized.
pub struct SandboxGuard<'a> {
    gate: &'a dyn SafetyGate,
    id: Option<SandboxId>,
}

impl<'a> SandboxGuard<'a> {
    pub fn open(gate: &'a dyn SafetyGate, task: &str) -> Result<Self> {
        let id = gate.open(task)?;
        Ok(Self {
            gate,
            id: Some(id),
        })
    }

    pub fn id(&self) -> &SandboxId {
        self.id.as_ref().expect("guard already resolved")
    }

    /// Commit and disarm the guard.
    pub fn finalize(mut self, message: &str) -> Result<()> {
        let id = self.id.take().expect("guard already resolved");
        self.gate.finalize(&id, message)
    }

    /// Roll back and disarm the guard.
    pub fn abandon(mut self) -> Result<()> {
        let id = self.id.take().expect("guard already resolved");
        self.gate.abandon(&id)
    }
}

impl Drop for SandboxGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take()
            && let Err(e) = self.gate.abandon(&id)
        {
            warn!(branch = %id.branch, error = %e, "failed to abandon sandbox on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> (GitSandbox, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        commit_file(dir.path(), "a.txt", "hello", "init");
        (GitSandbox::new(dir.path()), dir)
    }

    fn commit_file(dir: &Path, name: &str, content: &str, msg: &str) {
        let repo = Repository::open(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("test", "test@test.com").unwrap();
        if let Ok(head) = repo.head() {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
                .unwrap();
        } else {
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
                .unwrap();
        }
    }

    fn current_branch(dir: &Path) -> String {
        let repo = Repository::open(dir).unwrap();
        repo.head().unwrap().shorthand().unwrap().to_string()
    }

    #[test]
    fn test_open_creates_and_checks_out_branch() {
        let (gate, dir) = setup_repo();
        let id = gate.open("add rate limiter").unwrap();
        assert!(id.branch.starts_with("anvil/add-rate-limiter"));
        assert_eq!(current_branch(dir.path()), id.branch);
    }

    #[test]
    fn test_open_stashes_dirty_tree() {
        let (gate, dir) = setup_repo();
        fs::write(dir.path().join("dirty.txt"), "uncommitted").unwrap();
        let id = gate.open("task").unwrap();
        assert_eq!(current_branch(dir.path()), id.branch);
        assert!(!dir.path().join("dirty.txt").exists());
    }

    #[test]
    fn test_finalize_commits_changes() {
        let (gate, dir) = setup_repo();
        let id = gate.open("task").unwrap();
        fs::write(dir.path().join("new.txt"), "solution").unwrap();
        gate.finalize(&id, "task done").unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert!(head.message().unwrap().contains("task done"));
        assert!(!GitSandbox::is_dirty(&repo).unwrap());
    }

    #[test]
    fn test_finalize_leaves_workspace_dir_uncommitted() {
        let (gate, dir) = setup_repo();
        let id = gate.open("task").unwrap();
        fs::write(dir.path().join("solution.py"), "x = 42\n").unwrap();
        fs::create_dir_all(dir.path().join(".anvil/workspace/run-1")).unwrap();
        fs::write(
            dir.path().join(".anvil/workspace/run-1/plan.yaml"),
            "steps",
        )
        .unwrap();
        fs::write(dir.path().join(".anvil/experience.json"), "[]").unwrap();
        gate.finalize(&id, "task done").unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let tree = repo.head().unwrap().peel_to_tree().unwrap();
        assert!(tree.get_name("solution.py").is_some());
        assert!(tree.get_name(".anvil").is_none());
        // The workspace stays on disk, just untracked.
        assert!(dir.path().join(".anvil/experience.json").exists());
    }

    #[test]
    fn test_abandon_restores_original_branch_and_deletes_sandbox() {
        let (gate, dir) = setup_repo();
        let original = current_branch(dir.path());
        let id = gate.open("task").unwrap();
        fs::write(dir.path().join("junk.txt"), "discarded").unwrap();
        gate.abandon(&id).unwrap();

        assert_eq!(current_branch(dir.path()), original);
        let repo = Repository::open(dir.path()).unwrap();
        assert!(repo.find_branch(&id.branch, BranchType::Local).is_err());
    }

    #[test]
    fn test_guard_abandons_on_drop() {
        let (gate, dir) = setup_repo();
        let original = current_branch(dir.path());
        {
            let guard = SandboxGuard::open(&gate, "task").unwrap();
            assert_ne!(current_branch(dir.path()), original);
            drop(guard);
        }
        assert_eq!(current_branch(dir.path()), original);
    }

    #[test]
    fn test_guard_finalize_disarms_rollback() {
        let (gate, dir) = setup_repo();
        let branch;
        {
            let guard = SandboxGuard::open(&gate, "task").unwrap();
            branch = guard.id().branch.clone();
            fs::write(dir.path().join("kept.txt"), "solution").unwrap();
            guard.finalize("task done").unwrap();
        }
        // Still on the sandbox branch with the commit in place.
        assert_eq!(current_branch(dir.path()), branch);
        assert!(dir.path().join("kept.txt").exists());
    }
}
