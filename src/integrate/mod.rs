//! Merge-back of completed feature branches.
//!
//! After a feature's workflow completes in its worktree, the branch is merged
//! into the shared base branch in the primary checkout. The dispatcher
//! serializes calls into this module, so a merge never races another merge.
//!
//! A conflicted merge is always aborted in the primary checkout before being
//! reported, so the base branch working tree is never left mid-merge; the
//! preserved feature worktree is the inspection surface.

use crate::errors::IntegrationError;
use crate::worktree::Worktree;
use anyhow::Context;
use git2::build::CheckoutBuilder;
use git2::{BranchType, Repository, Signature};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of one merge attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The base branch now contains the feature branch.
    Merged,
    /// The merge conflicted; nothing was committed.
    Conflicted { paths: Vec<String> },
}

pub struct Integrator {
    repo_dir: PathBuf,
}

impl Integrator {
    pub fn open(repo_dir: &Path) -> Result<Self, IntegrationError> {
        Repository::open(repo_dir)?;
        Ok(Self {
            repo_dir: repo_dir.to_path_buf(),
        })
    }

    /// Merge a feature worktree's branch into the base branch.
    pub fn merge(
        &self,
        worktree: &Worktree,
        base_branch: &str,
    ) -> Result<MergeOutcome, IntegrationError> {
        let repo = Repository::open(&self.repo_dir)?;
        ensure_head_on(&repo, base_branch)?;

        let branch = repo
            .find_branch(&worktree.branch, BranchType::Local)
            .with_context(|| format!("Feature branch '{}' not found", worktree.branch))?;
        let annotated = repo.reference_to_annotated_commit(branch.get())?;

        let (analysis, _) = repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            debug!(feature = %worktree.feature_id, "base already contains branch");
            return Ok(MergeOutcome::Merged);
        }

        if analysis.is_fast_forward() {
            let refname = format!("refs/heads/{base_branch}");
            let mut reference = repo.find_reference(&refname)?;
            reference.set_target(annotated.id(), "trellis: fast-forward merge")?;
            repo.set_head(&refname)?;
            repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
            info!(
                feature = %worktree.feature_id,
                branch = %worktree.branch,
                "fast-forwarded into base"
            );
            return Ok(MergeOutcome::Merged);
        }

        repo.merge(&[&annotated], None, None)?;
        let mut index = repo.index()?;

        if index.has_conflicts() {
            let mut paths: Vec<String> = index
                .conflicts()?
                .filter_map(|c| c.ok())
                .filter_map(|c| c.our.or(c.their).or(c.ancestor))
                .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
                .collect();
            paths.sort();
            paths.dedup();

            // abort: restore a clean primary checkout before reporting
            repo.cleanup_state()?;
            repo.checkout_head(Some(CheckoutBuilder::default().force()))?;

            warn!(
                feature = %worktree.feature_id,
                conflicts = paths.len(),
                "merge conflicted"
            );
            return Ok(MergeOutcome::Conflicted { paths });
        }

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = Signature::now("trellis", "trellis@localhost")?;
        let head_commit = repo.head()?.peel_to_commit()?;
        let branch_commit = repo.find_commit(annotated.id())?;
        repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &format!("Merge {} into {}", worktree.branch, base_branch),
            &tree,
            &[&head_commit, &branch_commit],
        )?;
        repo.cleanup_state()?;
        repo.checkout_head(Some(CheckoutBuilder::default().force()))?;

        info!(
            feature = %worktree.feature_id,
            branch = %worktree.branch,
            "merged into base"
        );
        Ok(MergeOutcome::Merged)
    }
}

/// Put the primary checkout on the base branch if it isn't already.
fn ensure_head_on(repo: &Repository, base_branch: &str) -> Result<(), IntegrationError> {
    let refname = format!("refs/heads/{base_branch}");
    if repo.find_reference(&refname).is_err() {
        return Err(IntegrationError::BaseBranchMissing {
            branch: base_branch.to_string(),
        });
    }
    let needs_switch = repo
        .head()
        .map(|h| h.name() != Some(refname.as_str()))
        .unwrap_or(true);
    if needs_switch {
        repo.set_head(&refname)?;
        repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
    }
    Ok(())
}
