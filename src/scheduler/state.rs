//! Run-state tracking for the dispatcher.
//!
//! `SchedulerState` is an explicit record owned by one run, not a global, so
//! independent runs (and tests) never interfere. The dispatcher mutates it;
//! the final [`ExecutionReport`] is derived from it.

use crate::graph::{FeatureGraph, FeatureIdx};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Derived run state of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeatureStatus {
    /// Waiting on dependencies.
    Pending,
    /// Dependencies satisfied, waiting for a worker slot.
    Ready,
    /// A worker is driving the feature's workflow.
    Running { started_at: DateTime<Utc> },
    /// Workflow finished and the branch merged into the base.
    Completed { duration_ms: u64 },
    /// Workflow or merge failed terminally.
    Failed { error: String },
    /// A transitive dependency failed permanently.
    Blocked { failed_dependency: String },
    /// Merge conflicted; the worktree is preserved for manual resolution.
    AwaitingResolution { paths: Vec<String> },
}

impl FeatureStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. }
                | Self::Failed { .. }
                | Self::Blocked { .. }
                | Self::AwaitingResolution { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Short human-readable label for reports and the UI.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running { .. } => "running",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Blocked { .. } => "blocked",
            Self::AwaitingResolution { .. } => "awaiting-resolution",
        }
    }
}

/// Mutable scheduling state for one run.
#[derive(Debug)]
pub struct SchedulerState {
    statuses: Vec<FeatureStatus>,
    completed: HashSet<FeatureIdx>,
}

impl SchedulerState {
    pub fn new(feature_count: usize) -> Self {
        Self {
            statuses: vec![FeatureStatus::Pending; feature_count],
            completed: HashSet::new(),
        }
    }

    pub fn status(&self, idx: FeatureIdx) -> &FeatureStatus {
        &self.statuses[idx]
    }

    pub fn statuses(&self) -> &[FeatureStatus] {
        &self.statuses
    }

    /// Features whose dependencies are all completed and which may be
    /// dispatched, in declaration order (the tie-break policy).
    pub fn ready_features(&self, graph: &FeatureGraph) -> Vec<FeatureIdx> {
        (0..self.statuses.len())
            .filter(|&i| {
                matches!(
                    self.statuses[i],
                    FeatureStatus::Pending | FeatureStatus::Ready
                ) && graph.dependencies_satisfied(i, &self.completed)
            })
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.statuses.iter().filter(|s| s.is_running()).count()
    }

    pub fn all_terminal(&self) -> bool {
        self.statuses.iter().all(|s| s.is_terminal())
    }

    pub fn mark_ready(&mut self, idx: FeatureIdx) {
        if matches!(self.statuses[idx], FeatureStatus::Pending) {
            self.statuses[idx] = FeatureStatus::Ready;
        }
    }

    pub fn mark_running(&mut self, idx: FeatureIdx) {
        self.statuses[idx] = FeatureStatus::Running {
            started_at: Utc::now(),
        };
    }

    pub fn mark_completed(&mut self, idx: FeatureIdx) {
        let duration_ms = match &self.statuses[idx] {
            FeatureStatus::Running { started_at } => (Utc::now() - *started_at)
                .num_milliseconds()
                .max(0) as u64,
            _ => 0,
        };
        self.statuses[idx] = FeatureStatus::Completed { duration_ms };
        self.completed.insert(idx);
    }

    /// Mark a feature failed and eagerly propagate `Blocked` to every
    /// transitive dependent, so the next ready-set computation is correct
    /// without re-deriving from failed state. Returns the newly blocked
    /// indices with the failed feature's id.
    pub fn mark_failed(
        &mut self,
        graph: &FeatureGraph,
        idx: FeatureIdx,
        error: &str,
    ) -> Vec<FeatureIdx> {
        self.statuses[idx] = FeatureStatus::Failed {
            error: error.to_string(),
        };

        let failed_id = graph
            .get(idx)
            .map(|f| f.id.clone())
            .unwrap_or_default();
        let mut blocked = Vec::new();
        for dep_idx in graph.transitive_dependents(idx) {
            if !self.statuses[dep_idx].is_terminal() && !self.statuses[dep_idx].is_running() {
                self.statuses[dep_idx] = FeatureStatus::Blocked {
                    failed_dependency: failed_id.clone(),
                };
                blocked.push(dep_idx);
            }
        }
        blocked
    }

    /// Mark a feature failed by cancellation. Dependents are left pending:
    /// the run is terminating, not the dependency chain.
    pub fn mark_cancelled(&mut self, idx: FeatureIdx, reason: &str) {
        self.statuses[idx] = FeatureStatus::Failed {
            error: format!("cancelled: {reason}"),
        };
    }

    pub fn mark_awaiting_resolution(&mut self, idx: FeatureIdx, paths: Vec<String>) {
        self.statuses[idx] = FeatureStatus::AwaitingResolution { paths };
    }
}

/// Terminal state of one feature in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureReport {
    pub id: String,
    #[serde(flatten)]
    pub status: FeatureStatus,
}

/// What a run produced, feature by feature, in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub graph_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub timed_out: bool,
    pub features: Vec<FeatureReport>,
}

impl ExecutionReport {
    pub fn from_state(
        run_id: Uuid,
        graph_name: &str,
        started_at: DateTime<Utc>,
        timed_out: bool,
        graph: &FeatureGraph,
        state: &SchedulerState,
    ) -> Self {
        let features = graph
            .features()
            .iter()
            .enumerate()
            .map(|(i, f)| FeatureReport {
                id: f.id.clone(),
                status: state.status(i).clone(),
            })
            .collect();
        Self {
            run_id,
            graph_name: graph_name.to_string(),
            started_at,
            finished_at: Utc::now(),
            timed_out,
            features,
        }
    }

    pub fn all_completed(&self) -> bool {
        !self.timed_out && self.features.iter().all(|f| f.status.is_success())
    }

    pub fn count(&self, label: &str) -> usize {
        self.features
            .iter()
            .filter(|f| f.status.label() == label)
            .count()
    }

    /// Persist the report as `<runs_dir>/<run-id>.json`.
    pub fn save(&self, runs_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(runs_dir)
            .with_context(|| format!("Failed to create runs dir {}", runs_dir.display()))?;
        let path = runs_dir.join(format!("{}.json", self.run_id));
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        Ok(path)
    }
}

/// Progress events emitted during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureEvent {
    Started {
        feature: String,
    },
    PhaseStarted {
        feature: String,
        phase: String,
        attempt: u32,
    },
    PhaseCompleted {
        feature: String,
        phase: String,
    },
    Completed {
        feature: String,
    },
    Failed {
        feature: String,
        error: String,
    },
    Blocked {
        feature: String,
        failed_dependency: String,
    },
    AwaitingResolution {
        feature: String,
        paths: Vec<String>,
    },
    RunCompleted {
        completed: usize,
        failed: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Feature, FeatureGraph, Graph, Layer};

    fn graph(features: Vec<(&str, Vec<&str>)>) -> FeatureGraph {
        let features = features
            .into_iter()
            .map(|(id, deps)| Feature::new(id, "test", deps.into_iter().map(String::from).collect()))
            .collect();
        FeatureGraph::build(&Graph {
            name: "test".to_string(),
            layers: vec![Layer {
                id: "l0".to_string(),
                name: "All".to_string(),
                depends_on: Vec::new(),
                features,
            }],
        })
        .unwrap()
    }

    #[test]
    fn ready_set_respects_dependencies_and_order() {
        let g = graph(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec![])]);
        let mut state = SchedulerState::new(g.len());

        assert_eq!(state.ready_features(&g), vec![0, 2]);

        state.mark_running(0);
        assert_eq!(state.ready_features(&g), vec![2]);

        state.mark_completed(0);
        assert_eq!(state.ready_features(&g), vec![1, 2]);
    }

    #[test]
    fn mark_failed_blocks_transitive_dependents_eagerly() {
        let g = graph(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["b"]),
            ("d", vec![]),
        ]);
        let mut state = SchedulerState::new(g.len());
        state.mark_running(0);

        let blocked = state.mark_failed(&g, 0, "boom");
        assert_eq!(blocked, vec![1, 2]);
        assert!(matches!(
            state.status(1),
            FeatureStatus::Blocked { failed_dependency } if failed_dependency == "a"
        ));
        assert!(matches!(state.status(2), FeatureStatus::Blocked { .. }));
        assert!(matches!(state.status(3), FeatureStatus::Pending));
        // blocked features never enter the ready set
        assert_eq!(state.ready_features(&g), vec![3]);
    }

    #[test]
    fn cancelled_features_do_not_block_dependents() {
        let g = graph(vec![("a", vec![]), ("b", vec!["a"])]);
        let mut state = SchedulerState::new(g.len());
        state.mark_running(0);
        state.mark_cancelled(0, "run deadline exceeded");

        assert!(matches!(
            state.status(0),
            FeatureStatus::Failed { error } if error.starts_with("cancelled")
        ));
        assert!(matches!(state.status(1), FeatureStatus::Pending));
    }

    #[test]
    fn awaiting_resolution_is_terminal_but_not_success() {
        let mut state = SchedulerState::new(1);
        state.mark_running(0);
        state.mark_awaiting_resolution(0, vec!["src/lib.rs".to_string()]);
        assert!(state.status(0).is_terminal());
        assert!(!state.status(0).is_success());
        assert_eq!(state.status(0).label(), "awaiting-resolution");
    }

    #[test]
    fn completed_records_duration() {
        let mut state = SchedulerState::new(1);
        state.mark_running(0);
        state.mark_completed(0);
        assert!(matches!(state.status(0), FeatureStatus::Completed { .. }));
        assert!(state.all_terminal());
    }

    #[test]
    fn report_counts_and_outcome() {
        let g = graph(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec![])]);
        let mut state = SchedulerState::new(g.len());
        state.mark_running(0);
        state.mark_completed(0);
        state.mark_running(2);
        state.mark_failed(&g, 2, "boom");
        state.mark_running(1);
        state.mark_completed(1);

        let report = ExecutionReport::from_state(
            Uuid::new_v4(),
            "test",
            Utc::now(),
            false,
            &g,
            &state,
        );
        assert!(!report.all_completed());
        assert_eq!(report.count("completed"), 2);
        assert_eq!(report.count("failed"), 1);
    }

    #[test]
    fn timed_out_report_is_never_a_success() {
        let g = graph(vec![("a", vec![])]);
        let mut state = SchedulerState::new(g.len());
        state.mark_running(0);
        state.mark_completed(0);
        let report =
            ExecutionReport::from_state(Uuid::new_v4(), "test", Utc::now(), true, &g, &state);
        assert!(!report.all_completed());
    }

    #[test]
    fn report_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let g = graph(vec![("a", vec![])]);
        let mut state = SchedulerState::new(g.len());
        state.mark_running(0);
        state.mark_awaiting_resolution(0, vec!["x.rs".to_string()]);

        let report =
            ExecutionReport::from_state(Uuid::new_v4(), "test", Utc::now(), false, &g, &state);
        let path = report.save(dir.path()).unwrap();

        let loaded: ExecutionReport =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(loaded.run_id, report.run_id);
        assert!(matches!(
            &loaded.features[0].status,
            FeatureStatus::AwaitingResolution { paths } if paths == &["x.rs".to_string()]
        ));
    }
}
