//! Per-feature workflow execution.
//!
//! The engine drives one feature through its ordered phases via the phase
//! runner, consulting the state store on every transition. Execution is
//! resumable at phase granularity: a restart re-reads phase and retry state
//! and continues from the first incomplete phase. Within a phase, already
//! completed task units are handed to the runner so it can skip them.

use crate::errors::PhaseError;
use crate::graph::Feature;
use crate::runner::{CancelToken, ConflictRequest, PhaseOutput, PhaseRequest, PhaseRunner};
use crate::scheduler::FeatureEvent;
use crate::state::{PhaseExecutionState, RetryLedger, StateKind, StateStore, TaskExecutionState};
use crate::worktree::Worktree;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Ledger phase name for automated conflict-resolution attempts; shares the
/// retry machinery with ordinary phases.
const INTEGRATE_PHASE: &str = "integrate";

pub struct WorkflowEngine {
    store: Arc<StateStore>,
    workflow: Vec<String>,
    max_retries: u32,
    events: Option<mpsc::Sender<FeatureEvent>>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<StateStore>, workflow: Vec<String>, max_retries: u32) -> Self {
        Self {
            store,
            workflow,
            max_retries,
            events: None,
        }
    }

    /// Attach a progress event channel.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<FeatureEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    async fn emit(&self, event: FeatureEvent) {
        if let Some(ref tx) = self.events {
            tx.send(event).await.ok();
        }
    }

    /// Drive a feature through every phase not yet completed.
    pub async fn run_feature(
        &self,
        feature: &Feature,
        worktree: &Worktree,
        runner: &dyn PhaseRunner,
        cancel: CancelToken,
    ) -> Result<(), PhaseError> {
        let mut phase_state: PhaseExecutionState = self
            .store
            .load(&feature.id, StateKind::Phase)?
            .unwrap_or_else(|| PhaseExecutionState::new(self.workflow.len()));
        phase_state.resize(self.workflow.len());

        let mut task_state: TaskExecutionState = self
            .store
            .load(&feature.id, StateKind::Task)?
            .unwrap_or_default();

        let mut ledger: RetryLedger = self
            .store
            .load(&feature.id, StateKind::Retry)?
            .unwrap_or_default();

        for (idx, phase) in self.workflow.iter().enumerate() {
            if phase_state.is_complete(idx) {
                debug!(feature = %feature.id, phase, "phase already complete, skipping");
                continue;
            }

            self.run_phase(
                feature,
                worktree,
                runner,
                &cancel,
                phase,
                idx,
                &mut phase_state,
                &mut task_state,
                &mut ledger,
            )
            .await?;
        }

        info!(feature = %feature.id, "workflow complete");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_phase(
        &self,
        feature: &Feature,
        worktree: &Worktree,
        runner: &dyn PhaseRunner,
        cancel: &CancelToken,
        phase: &str,
        idx: usize,
        phase_state: &mut PhaseExecutionState,
        task_state: &mut TaskExecutionState,
        ledger: &mut RetryLedger,
    ) -> Result<(), PhaseError> {
        loop {
            if cancel.is_cancelled() {
                return Err(PhaseError::Cancelled {
                    phase: phase.to_string(),
                });
            }

            {
                let retry = ledger.state_mut(phase, self.max_retries);
                if !retry.can_retry() {
                    // resumed into an already-exhausted phase
                    return Err(PhaseError::RetryExhausted {
                        phase: phase.to_string(),
                        attempts: retry.attempts,
                    });
                }
                retry.record_attempt();
            }
            self.store.save(&feature.id, StateKind::Retry, ledger)?;

            phase_state.record_attempt(idx);
            self.store.save(&feature.id, StateKind::Phase, phase_state)?;

            let attempt = ledger
                .state(phase)
                .map(|s| s.attempts)
                .unwrap_or(1);

            self.emit(FeatureEvent::PhaseStarted {
                feature: feature.id.clone(),
                phase: phase.to_string(),
                attempt,
            })
            .await;

            let request = PhaseRequest {
                feature_id: feature.id.clone(),
                description: feature.description.clone(),
                phase: phase.to_string(),
                attempt,
                worktree_path: worktree.path.clone(),
                completed_units: task_state.completed_units(phase),
            };

            match runner.run_phase(&request, cancel.clone()).await {
                Ok(PhaseOutput { completed_units }) => {
                    for unit in &completed_units {
                        task_state.mark_complete(phase, unit);
                    }
                    self.store.save(&feature.id, StateKind::Task, task_state)?;

                    phase_state.mark_complete(idx);
                    self.store.save(&feature.id, StateKind::Phase, phase_state)?;

                    ledger.reset(phase);
                    self.store.save(&feature.id, StateKind::Retry, ledger)?;

                    self.emit(FeatureEvent::PhaseCompleted {
                        feature: feature.id.clone(),
                        phase: phase.to_string(),
                    })
                    .await;
                    return Ok(());
                }
                Err(err @ PhaseError::Cancelled { .. }) => return Err(err),
                Err(err) => {
                    // the attempt was already recorded; persist any units the
                    // runner may have finished before failing
                    self.store.save(&feature.id, StateKind::Task, task_state)?;

                    let retry = ledger.state_mut(phase, self.max_retries);
                    if !retry.can_retry() {
                        warn!(
                            feature = %feature.id,
                            phase,
                            attempts = retry.attempts,
                            "retry budget exhausted"
                        );
                        return Err(PhaseError::RetryExhausted {
                            phase: phase.to_string(),
                            attempts: retry.attempts,
                        });
                    }
                    warn!(feature = %feature.id, phase, error = %err, "phase attempt failed, retrying");
                }
            }
        }
    }

    /// One automated conflict-resolution attempt, accounted against the same
    /// retry budget as any other phase. Returns `RetryExhausted` once the
    /// budget is spent.
    pub async fn resolve_conflicts(
        &self,
        feature: &Feature,
        worktree: &Worktree,
        runner: &dyn PhaseRunner,
        paths: &[String],
        cancel: &CancelToken,
    ) -> Result<(), PhaseError> {
        if cancel.is_cancelled() {
            return Err(PhaseError::Cancelled {
                phase: INTEGRATE_PHASE.to_string(),
            });
        }

        let mut ledger: RetryLedger = self
            .store
            .load(&feature.id, StateKind::Retry)?
            .unwrap_or_default();
        {
            let retry = ledger.state_mut(INTEGRATE_PHASE, self.max_retries);
            if !retry.can_retry() {
                return Err(PhaseError::RetryExhausted {
                    phase: INTEGRATE_PHASE.to_string(),
                    attempts: retry.attempts,
                });
            }
            retry.record_attempt();
        }
        self.store.save(&feature.id, StateKind::Retry, &ledger)?;

        let request = ConflictRequest {
            feature_id: feature.id.clone(),
            worktree_path: worktree.path.clone(),
            base_branch: worktree.base_branch.clone(),
            paths: paths.to_vec(),
        };
        runner.resolve_conflicts(&request, cancel.clone()).await
    }
}
