//! Retry accounting per (feature, phase) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attempt counter for one phase of one feature.
///
/// The budget is the initial attempt plus `max_retries` retries: a phase with
/// `max_retries = 1` may run twice in total. `attempts` is monotonically
/// non-decreasing until an explicit [`reset`](RetryState::reset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryState {
    pub attempts: u32,
    pub max_retries: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempts: 0,
            max_retries,
            last_attempt_at: None,
        }
    }

    /// Total attempts the budget allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether another attempt may be made.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts()
    }

    /// Record the start of an attempt.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
        self.last_attempt_at = Some(Utc::now());
    }

    /// Reset the counter after a successful attempt.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// The durable retry record for one feature: one [`RetryState`] per phase
/// name, stored as a single record in the state store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryLedger {
    #[serde(default)]
    pub phases: BTreeMap<String, RetryState>,
}

impl RetryLedger {
    /// The retry state for a phase, created with the given budget on first
    /// access.
    pub fn state_mut(&mut self, phase: &str, max_retries: u32) -> &mut RetryState {
        self.phases
            .entry(phase.to_string())
            .or_insert_with(|| RetryState::new(max_retries))
    }

    pub fn state(&self, phase: &str) -> Option<&RetryState> {
        self.phases.get(phase)
    }

    /// Reset one phase's counter (kept in the ledger so the timestamp and
    /// budget survive).
    pub fn reset(&mut self, phase: &str) {
        if let Some(state) = self.phases.get_mut(phase) {
            state.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_can_attempt() {
        let state = RetryState::new(0);
        assert!(state.can_retry());
        assert_eq!(state.max_attempts(), 1);
    }

    #[test]
    fn budget_allows_initial_attempt_plus_retries() {
        // max_retries = 1: two total attempts, never a third
        let mut state = RetryState::new(1);

        state.record_attempt();
        assert_eq!(state.attempts, 1);
        assert!(state.can_retry());

        state.record_attempt();
        assert_eq!(state.attempts, 2);
        assert!(!state.can_retry());
    }

    #[test]
    fn attempts_are_monotonic_until_reset() {
        let mut state = RetryState::new(3);
        state.record_attempt();
        state.record_attempt();
        assert_eq!(state.attempts, 2);
        state.reset();
        assert_eq!(state.attempts, 0);
        assert!(state.can_retry());
    }

    #[test]
    fn record_attempt_stamps_timestamp() {
        let mut state = RetryState::new(1);
        assert!(state.last_attempt_at.is_none());
        state.record_attempt();
        assert!(state.last_attempt_at.is_some());
    }

    #[test]
    fn ledger_creates_state_on_first_access() {
        let mut ledger = RetryLedger::default();
        assert!(ledger.state("plan").is_none());
        ledger.state_mut("plan", 2).record_attempt();
        assert_eq!(ledger.state("plan").unwrap().attempts, 1);
    }

    #[test]
    fn ledger_phases_are_independent() {
        let mut ledger = RetryLedger::default();
        ledger.state_mut("plan", 2).record_attempt();
        ledger.state_mut("implement", 2);
        assert_eq!(ledger.state("plan").unwrap().attempts, 1);
        assert_eq!(ledger.state("implement").unwrap().attempts, 0);
    }

    #[test]
    fn ledger_reset_clears_one_phase() {
        let mut ledger = RetryLedger::default();
        ledger.state_mut("plan", 2).record_attempt();
        ledger.state_mut("implement", 2).record_attempt();
        ledger.reset("plan");
        assert_eq!(ledger.state("plan").unwrap().attempts, 0);
        assert_eq!(ledger.state("implement").unwrap().attempts, 1);
    }

    #[test]
    fn ledger_serde_roundtrip() {
        let mut ledger = RetryLedger::default();
        ledger.state_mut("plan", 2).record_attempt();
        let json = serde_json::to_string(&ledger).unwrap();
        let back: RetryLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ledger);
    }
}
