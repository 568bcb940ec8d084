//! The phase-runner seam.
//!
//! The engine treats "run one phase of one feature" as an opaque operation
//! behind the [`PhaseRunner`] capability trait. The production implementation
//! spawns an external agent process ([`ProcessRunner`]); tests substitute
//! mocks. Conflict resolution under the `agent` policy is the same kind of
//! operation and lives on the same trait.

mod process;

pub use process::ProcessRunner;

use crate::errors::PhaseError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::watch;

/// Everything a runner needs to execute one phase of one feature.
#[derive(Debug, Clone)]
pub struct PhaseRequest {
    pub feature_id: String,
    /// Free-text feature description from the graph document.
    pub description: String,
    pub phase: String,
    /// 1-based attempt number under the retry budget.
    pub attempt: u32,
    /// Isolated working copy the phase must run in.
    pub worktree_path: PathBuf,
    /// Unit ids already completed within this phase; the runner skips them.
    pub completed_units: Vec<String>,
}

/// What a successful phase attempt reports back.
#[derive(Debug, Clone, Default)]
pub struct PhaseOutput {
    /// Unit ids newly completed during this attempt.
    pub completed_units: Vec<String>,
}

/// Context for an automated merge-conflict resolution attempt.
#[derive(Debug, Clone)]
pub struct ConflictRequest {
    pub feature_id: String,
    pub worktree_path: PathBuf,
    pub base_branch: String,
    /// Paths that conflicted in the attempted merge.
    pub paths: Vec<String>,
}

/// Capability interface for executing phases.
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    /// Execute one phase of one feature inside its worktree.
    async fn run_phase(
        &self,
        request: &PhaseRequest,
        cancel: CancelToken,
    ) -> Result<PhaseOutput, PhaseError>;

    /// Attempt automated merge-conflict resolution inside the worktree.
    /// Success means the feature branch is expected to merge cleanly now.
    async fn resolve_conflicts(
        &self,
        request: &ConflictRequest,
        cancel: CancelToken,
    ) -> Result<(), PhaseError> {
        let _ = (request, cancel);
        Err(PhaseError::Other(anyhow::anyhow!(
            "this runner does not support conflict resolution"
        )))
    }
}

/// Fires cancellation for every [`CancelToken`] cloned from it.
#[derive(Debug)]
pub struct CancelTrigger {
    tx: watch::Sender<bool>,
}

impl CancelTrigger {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation signal observed by workers and runners.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> (CancelTrigger, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelTrigger { tx }, CancelToken { rx })
    }

    /// A token that never fires; useful for library callers without a
    /// deadline.
    pub fn never() -> CancelToken {
        let (tx, rx) = watch::channel(false);
        // leak the sender so the channel stays open
        std::mem::forget(tx);
        CancelToken { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation fires. Never resolves if the trigger is
    /// dropped without firing.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
