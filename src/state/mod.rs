//! Resumable execution state.
//!
//! Three independent state kinds are persisted per feature through the
//! [`StateStore`]: retry counters, phase completion, and task-unit
//! completion. A process restart re-reads them and continues from the first
//! incomplete phase instead of restarting features from scratch.

mod phase;
mod retry;
mod store;
mod task;

pub use phase::PhaseExecutionState;
pub use retry::{RetryLedger, RetryState};
pub use store::{StateKind, StateStore};
pub use task::TaskExecutionState;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn phase_state_roundtrips_through_store() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let mut state = PhaseExecutionState::new(4);
        state.record_attempt(0);
        state.mark_complete(0);
        state.mark_complete(1);
        store.save("feat", StateKind::Phase, &state).unwrap();

        let loaded: PhaseExecutionState =
            store.load("feat", StateKind::Phase).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn task_state_roundtrips_through_store() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let mut state = TaskExecutionState::default();
        state.mark_complete("implement", "t1");
        store.save("feat", StateKind::Task, &state).unwrap();

        let loaded: TaskExecutionState = store.load("feat", StateKind::Task).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn retry_ledger_roundtrips_through_store() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let mut ledger = RetryLedger::default();
        ledger.state_mut("plan", 2).record_attempt();
        store.save("feat", StateKind::Retry, &ledger).unwrap();

        let loaded: RetryLedger = store.load("feat", StateKind::Retry).unwrap().unwrap();
        assert_eq!(loaded, ledger);
        assert_eq!(loaded.state("plan").unwrap().attempts, 1);
    }
}
