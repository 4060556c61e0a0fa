//! Driver error types.

use thiserror::Error;

/// Errors a compute driver can report.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("instance error: {0}")]
    Instance(String),

    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;
