//! Task-unit completion state within a feature's phases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Finer-grained sibling of [`super::PhaseExecutionState`]: which resumable
/// unit-of-work ids within each phase have completed. Consulted on resume so
/// a restarted phase skips its finished units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionState {
    /// phase name -> completed unit ids.
    #[serde(default)]
    pub completed: BTreeMap<String, BTreeSet<String>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl TaskExecutionState {
    /// Mark a unit completed within a phase. Idempotent: returns `false` when
    /// the unit was already marked.
    pub fn mark_complete(&mut self, phase: &str, unit: &str) -> bool {
        self.last_attempt_at = Some(Utc::now());
        self.completed
            .entry(phase.to_string())
            .or_default()
            .insert(unit.to_string())
    }

    pub fn is_complete(&self, phase: &str, unit: &str) -> bool {
        self.completed
            .get(phase)
            .is_some_and(|units| units.contains(unit))
    }

    /// Completed unit ids for a phase, in stable order.
    pub fn completed_units(&self, phase: &str) -> Vec<String> {
        self.completed
            .get(phase)
            .map(|units| units.iter().cloned().collect())
            .unwrap_or_default()
    }
}
