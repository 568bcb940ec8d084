//! Dependency-aware dispatch with bounded concurrency.
//!
//! One dispatcher loop computes the ready set and hands features to a
//! semaphore-bounded pool of worker tasks. Each worker drives one feature's
//! full lifecycle: worktree creation, optional setup, the phase workflow,
//! and merge-back. Completions flow back over an mpsc channel; failures
//! propagate `Blocked` to transitive dependents eagerly. Merges into the
//! base branch are serialized behind a mutex, so a worktree created after
//! its dependencies completed sees their merged results.

use crate::config::{ConflictPolicy, ExecutionConfig};
use crate::engine::WorkflowEngine;
use crate::errors::{GraphError, PhaseError, RunError};
use crate::graph::{Feature, FeatureGraph, Graph, validate};
use crate::integrate::{Integrator, MergeOutcome};
use crate::runner::{CancelToken, PhaseRunner};
use crate::scheduler::state::{ExecutionReport, FeatureEvent, SchedulerState};
use crate::state::StateStore;
use crate::worktree::WorktreeManager;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// What one worker reports back for its feature.
#[derive(Debug)]
enum WorkerResult {
    Completed,
    Failed(String),
    Cancelled(String),
    AwaitingResolution(Vec<String>),
}

pub struct Scheduler {
    config: Arc<ExecutionConfig>,
    events: Option<mpsc::Sender<FeatureEvent>>,
}

impl Scheduler {
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config: Arc::new(config),
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

    /// Compute dispatch waves without executing anything (dry run).
    pub fn plan(graph: &Graph) -> Result<Vec<Vec<String>>, RunError> {
        Self::check(graph)?;
        let index = FeatureGraph::build(graph)?;
        Ok(index.compute_waves())
    }

    fn check(graph: &Graph) -> Result<(), RunError> {
        let report = validate(graph);
        if report.has_errors() {
            return Err(RunError::InvalidGraph(GraphError::Invalid {
                count: report.error_count(),
            }));
        }
        Ok(())
    }

    /// Execute the whole graph. Always returns a report when the run could
    /// start, even if features failed or the deadline fired.
    pub async fn run(
        &self,
        graph: &Graph,
        runner: Arc<dyn PhaseRunner>,
    ) -> Result<ExecutionReport, RunError> {
        Self::check(graph)?;
        let index = Arc::new(FeatureGraph::build(graph)?);

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, graph = %graph.name, features = index.len(), "run starting");

        let mut state = SchedulerState::new(index.len());
        if index.is_empty() {
            return Ok(ExecutionReport::from_state(
                run_id, &graph.name, started_at, false, &index, &state,
            ));
        }

        let store = Arc::new(StateStore::open(&self.config.state_dir).map_err(RunError::Other)?);
        let worktrees = Arc::new(
            WorktreeManager::open(
                &self.config.project_dir,
                &self.config.worktree_dir,
                &graph.name,
            )
            .map_err(|e| RunError::Other(e.into()))?,
        );
        let integrator = Arc::new(
            Integrator::open(&self.config.project_dir).map_err(|e| RunError::Other(e.into()))?,
        );
        let mut engine = WorkflowEngine::new(
            Arc::clone(&store),
            self.config.workflow.clone(),
            self.config.max_retries,
        );
        if let Some(ref tx) = self.events {
            engine = engine.with_event_channel(tx.clone());
        }
        let engine = Arc::new(engine);

        let (trigger, cancel) = CancelToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        let deadline_task = self.config.timeout.map(|timeout| {
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("run deadline exceeded, cancelling in-flight features");
                timed_out.store(true, Ordering::SeqCst);
                trigger.cancel();
            })
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let merge_lock = Arc::new(Mutex::new(()));
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, WorkerResult)>(index.len());
        let mut active: HashMap<usize, JoinHandle<()>> = HashMap::new();

        loop {
            // dispatch: declaration order is the tie-break when the ready
            // set exceeds free slots
            if !cancel.is_cancelled() {
                for idx in state.ready_features(&index) {
                    if active.len() >= self.config.max_parallel {
                        state.mark_ready(idx);
                        continue;
                    }

                    let permit = Arc::clone(&semaphore)
                        .acquire_owned()
                        .await
                        .map_err(|e| RunError::Other(e.into()))?;

                    state.mark_running(idx);
                    let feature = index
                        .get(idx)
                        .cloned()
                        .unwrap_or_else(|| Feature::new("", "", Vec::new()));
                    self.emit(FeatureEvent::Started {
                        feature: feature.id.clone(),
                    })
                    .await;

                    let handle = tokio::spawn(run_one_feature(
                        idx,
                        feature,
                        Arc::clone(&self.config),
                        Arc::clone(&worktrees),
                        Arc::clone(&engine),
                        Arc::clone(&integrator),
                        Arc::clone(&runner),
                        Arc::clone(&merge_lock),
                        cancel.clone(),
                        result_tx.clone(),
                        permit,
                    ));
                    active.insert(idx, handle);
                }
            }

            if active.is_empty() {
                // nothing running and nothing dispatchable: settled
                break;
            }

            let Some((idx, result)) = result_rx.recv().await else {
                break;
            };
            if let Some(handle) = active.remove(&idx) {
                handle.await.ok();
            }

            let feature_id = index.get(idx).map(|f| f.id.clone()).unwrap_or_default();
            match result {
                WorkerResult::Completed => {
                    state.mark_completed(idx);
                    self.emit(FeatureEvent::Completed {
                        feature: feature_id,
                    })
                    .await;
                }
                WorkerResult::Failed(error) => {
                    let blocked = state.mark_failed(&index, idx, &error);
                    self.emit(FeatureEvent::Failed {
                        feature: feature_id.clone(),
                        error,
                    })
                    .await;
                    for dep_idx in blocked {
                        self.emit(FeatureEvent::Blocked {
                            feature: index.get(dep_idx).map(|f| f.id.clone()).unwrap_or_default(),
                            failed_dependency: feature_id.clone(),
                        })
                        .await;
                    }
                }
                WorkerResult::Cancelled(reason) => {
                    state.mark_cancelled(idx, &reason);
                    self.emit(FeatureEvent::Failed {
                        feature: feature_id,
                        error: format!("cancelled: {reason}"),
                    })
                    .await;
                }
                WorkerResult::AwaitingResolution(paths) => {
                    state.mark_awaiting_resolution(idx, paths.clone());
                    self.emit(FeatureEvent::AwaitingResolution {
                        feature: feature_id,
                        paths,
                    })
                    .await;
                }
            }

            if state.all_terminal() {
                break;
            }
        }

        if let Some(task) = deadline_task {
            task.abort();
        }

        let report = ExecutionReport::from_state(
            run_id,
            &graph.name,
            started_at,
            timed_out.load(Ordering::SeqCst),
            &index,
            &state,
        );
        if let Err(e) = report.save(&self.config.runs_dir) {
            warn!(error = %e, "failed to persist run report");
        }

        self.emit(FeatureEvent::RunCompleted {
            completed: report.count("completed"),
            failed: report.count("failed"),
        })
        .await;
        info!(
            run_id = %run_id,
            completed = report.count("completed"),
            failed = report.count("failed"),
            blocked = report.count("blocked"),
            "run finished"
        );
        Ok(report)
    }
}

/// One worker: worktree, setup, workflow, merge-back, teardown.
#[allow(clippy::too_many_arguments)]
async fn run_one_feature(
    idx: usize,
    feature: Feature,
    config: Arc<ExecutionConfig>,
    worktrees: Arc<WorktreeManager>,
    engine: Arc<WorkflowEngine>,
    integrator: Arc<Integrator>,
    runner: Arc<dyn PhaseRunner>,
    merge_lock: Arc<Mutex<()>>,
    cancel: CancelToken,
    result_tx: mpsc::Sender<(usize, WorkerResult)>,
    permit: tokio::sync::OwnedSemaphorePermit,
) {
    let _permit = permit; // held for the worker's whole lifetime

    let result = drive_feature(
        &feature, &config, &worktrees, &engine, &integrator, runner.as_ref(), &merge_lock, cancel,
    )
    .await;
    result_tx.send((idx, result)).await.ok();
}

#[allow(clippy::too_many_arguments)]
async fn drive_feature(
    feature: &Feature,
    config: &ExecutionConfig,
    worktrees: &WorktreeManager,
    engine: &WorkflowEngine,
    integrator: &Integrator,
    runner: &dyn PhaseRunner,
    merge_lock: &Mutex<()>,
    cancel: CancelToken,
) -> WorkerResult {
    let mut worktree = match worktrees.create(&feature.id, &config.base_branch) {
        Ok(wt) => wt,
        Err(e) => return WorkerResult::Failed(format!("worktree creation failed: {e}")),
    };

    if let Some(ref script) = config.setup_script {
        if let Err(e) = worktrees.setup(&mut worktree, script).await {
            let _ = worktrees.teardown(&mut worktree, false);
            return WorkerResult::Failed(e.to_string());
        }
    } else {
        worktrees.activate(&mut worktree);
    }

    match engine
        .run_feature(feature, &worktree, runner, cancel.clone())
        .await
    {
        Ok(()) => {}
        Err(PhaseError::Cancelled { phase }) => {
            let _ = worktrees.teardown(&mut worktree, false);
            return WorkerResult::Cancelled(format!("run deadline exceeded during '{phase}'"));
        }
        Err(e) => {
            let _ = worktrees.teardown(&mut worktree, false);
            return WorkerResult::Failed(e.to_string());
        }
    }

    // merge-back; attempts into the shared base are serialized
    loop {
        let outcome = {
            let _guard = merge_lock.lock().await;
            integrator.merge(&worktree, &config.base_branch)
        };

        match outcome {
            Ok(MergeOutcome::Merged) => {
                let _ = worktrees.teardown(&mut worktree, false);
                return WorkerResult::Completed;
            }
            Ok(MergeOutcome::Conflicted { paths }) => match config.on_conflict {
                ConflictPolicy::Manual => {
                    let _ = worktrees.teardown(&mut worktree, true);
                    return WorkerResult::AwaitingResolution(paths);
                }
                ConflictPolicy::Agent => {
                    match engine
                        .resolve_conflicts(feature, &worktree, runner, &paths, &cancel)
                        .await
                    {
                        // re-attempt the merge; an unhelpful resolver pass
                        // still consumed budget, so this loop terminates
                        Ok(()) => continue,
                        Err(PhaseError::Cancelled { .. }) => {
                            let _ = worktrees.teardown(&mut worktree, true);
                            return WorkerResult::Cancelled(
                                "run deadline exceeded during conflict resolution".to_string(),
                            );
                        }
                        Err(PhaseError::RetryExhausted { .. }) => {
                            let _ = worktrees.teardown(&mut worktree, true);
                            return WorkerResult::AwaitingResolution(paths);
                        }
                        Err(_) => continue,
                    }
                }
            },
            Err(e) => {
                let _ = worktrees.teardown(&mut worktree, false);
                return WorkerResult::Failed(format!("merge failed: {e}"));
            }
        }
    }
}
