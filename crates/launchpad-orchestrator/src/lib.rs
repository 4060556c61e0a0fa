//! launchpad-orchestrator — the job lifecycle.
//!
//! Takes a job from uploaded artifact to downloaded output:
//!
//! ```text
//! Pending --start--> Provisioning --> Running --complete--> Completed
//!                         |              |
//!                       Failed       Stopping --> Pending
//! ```
//!
//! Any state can be deleted; a job that may still own a remote instance is
//! only removed once the driver confirms the instance is gone.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── JobStore (compare-and-swap on every write)
//!   ├── ComputeDriver (instances and objects, always under a timeout)
//!   ├── Estimator + InstanceCatalog (sizing)
//!   └── JobLocks (one in-flight operation per job)
//! ```

pub mod error;
mod locks;
pub mod orchestrator;

pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{
    INTERRUPTED_BY_RESTART, Orchestrator, OrchestratorSettings, PROVISIONING_TIMEOUT, validate_name,
};
