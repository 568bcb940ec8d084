//! Typed error hierarchy for the trellis engine.
//!
//! Three top-level enums cover the three subsystems:
//! - `GraphError` — graph loading and validation failures (fatal, run never starts)
//! - `PhaseError` — per-feature workflow execution failures
//! - `IntegrationError` — merge-back failures

use std::path::PathBuf;
use thiserror::Error;

/// Errors that make a graph document unusable.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Failed to read graph document at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse graph document: {0}")]
    ParseFailed(#[from] serde_yaml::Error),

    #[error("Unsupported schema_version {found} (this build understands version {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },

    #[error("Duplicate feature id '{id}'")]
    DuplicateFeature { id: String },

    #[error("Feature '{feature}' depends on unknown feature '{dependency}'")]
    UnknownDependency { feature: String, dependency: String },

    #[error("Graph failed validation with {count} error(s)")]
    Invalid { count: usize },
}

/// Errors from executing one feature's workflow.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Failed to spawn runner process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Phase '{phase}' attempt {attempt} failed: {message}")]
    AttemptFailed {
        phase: String,
        attempt: u32,
        message: String,
    },

    #[error("Retry budget exhausted for phase '{phase}' after {attempts} attempt(s)")]
    RetryExhausted { phase: String, attempts: u32 },

    #[error("Cancelled while running phase '{phase}'")]
    Cancelled { phase: String },

    #[error("Setup script exited with code {code}")]
    SetupFailed { code: i32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PhaseError {
    /// Whether this error ends the feature regardless of remaining budget.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RetryExhausted { .. } | Self::Cancelled { .. } | Self::SetupFailed { .. }
        )
    }
}

/// Errors from merging a feature branch back into the base branch.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Base branch '{branch}' not found in repository")]
    BaseBranchMissing { branch: String },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    InvalidGraph(#[from] GraphError),

    #[error("Repository error: {0}")]
    Repository(#[from] git2::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_error_retry_exhausted_carries_attempts() {
        let err = PhaseError::RetryExhausted {
            phase: "implement".to_string(),
            attempts: 3,
        };
        assert!(err.to_string().contains('3'));
        assert!(err.is_terminal());
    }

    #[test]
    fn phase_error_attempt_failed_is_not_terminal() {
        let err = PhaseError::AttemptFailed {
            phase: "plan".to_string(),
            attempt: 1,
            message: "runner exited with code 1".to_string(),
        };
        assert!(!err.is_terminal());
    }

    #[test]
    fn phase_error_cancelled_is_terminal() {
        let err = PhaseError::Cancelled {
            phase: "implement".to_string(),
        };
        assert!(err.is_terminal());
        assert!(err.to_string().contains("implement"));
    }

    #[test]
    fn graph_error_unknown_dependency_names_both_ids() {
        let err = GraphError::UnknownDependency {
            feature: "api".to_string(),
            dependency: "ghost".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("api"));
        assert!(msg.contains("ghost"));
    }

    #[test]
    fn run_error_converts_from_graph_error() {
        let inner = GraphError::Invalid { count: 2 };
        let err: RunError = inner.into();
        assert!(matches!(
            err,
            RunError::InvalidGraph(GraphError::Invalid { count: 2 })
        ));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&GraphError::Invalid { count: 1 });
        assert_std_error(&PhaseError::SetupFailed { code: 2 });
        assert_std_error(&IntegrationError::BaseBranchMissing {
            branch: "main".into(),
        });
    }
}
