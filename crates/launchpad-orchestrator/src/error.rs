//! Orchestrator error types.

use thiserror::Error;

use launchpad_driver::DriverError;
use launchpad_state::{JobState, StoreError};

/// Errors that can occur during job lifecycle operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("cannot {op} job {job} in state {state}")]
    Conflict {
        job: String,
        state: JobState,
        op: &'static str,
    },

    #[error("job {0} already holds a remote resource")]
    AlreadyProvisioned(String),

    #[error("job {0} has not completed")]
    NotCompleted(String),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    /// Whether the request lost against the current job state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Conflict { .. } | OrchestratorError::AlreadyProvisioned(_)
        )
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
