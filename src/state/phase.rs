//! Phase-completion state for one feature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which phases of a feature's workflow have completed.
///
/// Completion is represented by "all phases in the completed set"; the record
/// is removed only on explicit reset, never on normal completion, so a
/// finished feature stays skippable on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecutionState {
    pub current_phase: usize,
    pub total_phases: usize,
    pub completed: BTreeSet<usize>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl PhaseExecutionState {
    pub fn new(total_phases: usize) -> Self {
        Self {
            current_phase: 0,
            total_phases,
            completed: BTreeSet::new(),
            last_attempt_at: None,
        }
    }

    /// Record the start of an attempt on a phase.
    pub fn record_attempt(&mut self, phase: usize) {
        self.current_phase = phase;
        self.last_attempt_at = Some(Utc::now());
    }

    /// Mark a phase completed. Idempotent: returns `false` when the phase was
    /// already marked and nothing changed.
    pub fn mark_complete(&mut self, phase: usize) -> bool {
        self.completed.insert(phase)
    }

    pub fn is_complete(&self, phase: usize) -> bool {
        self.completed.contains(&phase)
    }

    /// First phase index not yet completed, if any.
    pub fn first_incomplete(&self) -> Option<usize> {
        (0..self.total_phases).find(|i| !self.completed.contains(i))
    }

    pub fn all_complete(&self) -> bool {
        self.first_incomplete().is_none()
    }

    /// Adjust the phase count when the configured workflow changed between
    /// runs; completed marks beyond the new count are dropped.
    pub fn resize(&mut self, total_phases: usize) {
        self.total_phases = total_phases;
        self.completed.retain(|&i| i < total_phases);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_nothing_complete() {
        let state = PhaseExecutionState::new(4);
        assert!(!state.all_complete());
        assert_eq!(state.first_incomplete(), Some(0));
        assert!(!state.is_complete(0));
    }

    #[test]
    fn mark_complete_is_idempotent() {
        let mut state = PhaseExecutionState::new(4);
        assert!(state.mark_complete(1));
        let snapshot = state.clone();
        // repeating the mark is a no-op
        assert!(!state.mark_complete(1));
        assert_eq!(state, snapshot);
    }

    #[test]
    fn first_incomplete_skips_completed_prefix() {
        let mut state = PhaseExecutionState::new(3);
        state.mark_complete(0);
        assert_eq!(state.first_incomplete(), Some(1));
        state.mark_complete(1);
        state.mark_complete(2);
        assert!(state.all_complete());
        assert_eq!(state.first_incomplete(), None);
    }

    #[test]
    fn completion_handles_gaps() {
        let mut state = PhaseExecutionState::new(3);
        state.mark_complete(2);
        assert_eq!(state.first_incomplete(), Some(0));
        assert!(!state.all_complete());
    }

    #[test]
    fn record_attempt_tracks_position_and_time() {
        let mut state = PhaseExecutionState::new(2);
        state.record_attempt(1);
        assert_eq!(state.current_phase, 1);
        assert!(state.last_attempt_at.is_some());
    }

    #[test]
    fn resize_drops_out_of_range_marks() {
        let mut state = PhaseExecutionState::new(4);
        state.mark_complete(0);
        state.mark_complete(3);
        state.resize(2);
        assert!(state.is_complete(0));
        assert!(!state.is_complete(3));
        assert_eq!(state.total_phases, 2);
    }

    #[test]
    fn serde_roundtrip_is_field_for_field() {
        let mut state = PhaseExecutionState::new(4);
        state.record_attempt(1);
        state.mark_complete(0);
        state.mark_complete(1);
        let json = serde_json::to_string(&state).unwrap();
        let back: PhaseExecutionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
