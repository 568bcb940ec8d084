//! Worktree isolation for feature execution.
//!
//! Each feature runs in its own git worktree on a branch cut from the base
//! branch, so concurrent features never touch each other's files. Branch and
//! worktree names are derived deterministically from (dag name, base branch,
//! feature id) via a digest, so two runs over different graphs cannot collide
//! on the same ref.
//!
//! A worktree created after a feature's dependencies completed branches from
//! a base tip that already contains their merged results, because the
//! dispatcher serializes merges into the base branch.

use crate::errors::{IntegrationError, PhaseError};
use crate::util::{hex_encode, sanitize_component};
use anyhow::{Context, Result};
use git2::{BranchType, Repository, WorktreeAddOptions, WorktreePruneOptions};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lifecycle of one feature's worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeStatus {
    /// Checkout exists; setup has not run.
    Created,
    /// Ready for (or in) phase execution.
    Active,
    /// Checkout and branch removed.
    Cleaned,
}

/// One feature's isolated working copy.
#[derive(Debug, Clone)]
pub struct Worktree {
    pub feature_id: String,
    /// Worktree name, also the directory name under the worktree base dir.
    pub name: String,
    pub path: PathBuf,
    /// Branch the worktree is checked out on.
    pub branch: String,
    pub base_branch: String,
    /// Commit the branch was cut from.
    pub base_commit: String,
    pub status: WorktreeStatus,
}

/// Creates and tears down per-feature worktrees.
pub struct WorktreeManager {
    repo_dir: PathBuf,
    base_dir: PathBuf,
    graph_name: String,
}

impl WorktreeManager {
    /// Open the manager against the primary repository.
    pub fn open(repo_dir: &Path, base_dir: &Path, graph_name: &str) -> Result<Self, IntegrationError> {
        Repository::open(repo_dir)?;
        Ok(Self {
            repo_dir: repo_dir.to_path_buf(),
            base_dir: base_dir.to_path_buf(),
            graph_name: graph_name.to_string(),
        })
    }

    /// Deterministic worktree name for a feature.
    pub fn worktree_name(&self, feature_id: &str, base_branch: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.graph_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(base_branch.as_bytes());
        hasher.update(b"\0");
        hasher.update(feature_id.as_bytes());
        let digest = hasher.finalize();
        format!(
            "{}-{}",
            sanitize_component(feature_id),
            &hex_encode(&digest)[..8]
        )
    }

    /// Branch name for a feature's worktree.
    pub fn branch_name(&self, feature_id: &str, base_branch: &str) -> String {
        format!("trellis/{}", self.worktree_name(feature_id, base_branch))
    }

    /// Create a worktree for a feature, branching from the current tip of the
    /// base branch.
    pub fn create(
        &self,
        feature_id: &str,
        base_branch: &str,
    ) -> Result<Worktree, IntegrationError> {
        let repo = Repository::open(&self.repo_dir)?;

        let base = repo
            .find_branch(base_branch, BranchType::Local)
            .map_err(|_| IntegrationError::BaseBranchMissing {
                branch: base_branch.to_string(),
            })?;
        let base_commit = base.get().peel_to_commit()?;

        let name = self.worktree_name(feature_id, base_branch);
        let branch_name = format!("trellis/{name}");
        let path = self.base_dir.join(&name);

        // a stale checkout or registration from a crashed run is replaced
        self.prune(&repo, &name, &path)
            .context("Failed to prune stale worktree")?;

        std::fs::create_dir_all(&self.base_dir)
            .context("Failed to create worktree base dir")?;

        let branch = repo.branch(&branch_name, &base_commit, true)?;
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(branch.get()));
        repo.worktree(&name, &path, Some(&opts))?;

        info!(
            feature = feature_id,
            branch = %branch_name,
            path = %path.display(),
            "worktree created"
        );

        Ok(Worktree {
            feature_id: feature_id.to_string(),
            name,
            path,
            branch: branch_name,
            base_branch: base_branch.to_string(),
            base_commit: base_commit.id().to_string(),
            status: WorktreeStatus::Created,
        })
    }

    /// Run the configured setup script inside the worktree. A non-zero exit
    /// fails the feature.
    pub async fn setup(&self, worktree: &mut Worktree, script: &str) -> Result<(), PhaseError> {
        debug!(feature = %worktree.feature_id, script, "running setup script");
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .current_dir(&worktree.path)
            .status()
            .await
            .map_err(PhaseError::SpawnFailed)?;

        if !status.success() {
            return Err(PhaseError::SetupFailed {
                code: status.code().unwrap_or(-1),
            });
        }
        worktree.status = WorktreeStatus::Active;
        Ok(())
    }

    /// Mark a worktree ready when no setup script is configured.
    pub fn activate(&self, worktree: &mut Worktree) {
        worktree.status = WorktreeStatus::Active;
    }

    /// Remove the worktree and its branch. With `keep` the checkout is left
    /// intact for manual inspection (pending conflict resolution).
    pub fn teardown(&self, worktree: &mut Worktree, keep: bool) -> Result<(), IntegrationError> {
        if keep {
            info!(
                feature = %worktree.feature_id,
                path = %worktree.path.display(),
                "worktree preserved for inspection"
            );
            return Ok(());
        }

        let repo = Repository::open(&self.repo_dir)?;
        self.prune(&repo, &worktree.name, &worktree.path)?;

        if let Ok(mut branch) = repo.find_branch(&worktree.branch, BranchType::Local) {
            branch.delete()?;
        }

        worktree.status = WorktreeStatus::Cleaned;
        debug!(feature = %worktree.feature_id, "worktree cleaned");
        Ok(())
    }

    fn prune(&self, repo: &Repository, name: &str, path: &Path) -> Result<(), IntegrationError> {
        if path.exists() {
            std::fs::remove_dir_all(path)
                .with_context(|| format!("Failed to remove worktree dir {}", path.display()))?;
        }
        if let Ok(wt) = repo.find_worktree(name) {
            let mut opts = WorktreePruneOptions::new();
            opts.valid(true).working_tree(true);
            wt.prune(Some(&mut opts))?;
        }
        Ok(())
    }
}
