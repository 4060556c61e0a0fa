//! Resource estimation seam.

use serde::{Deserialize, Serialize};

use launchpad_core::Requirement;

/// What an estimator may look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub job_name: String,
    pub location: String,
    pub size: u64,
    pub sha256: String,
}

/// Produces a resource requirement for an artifact.
pub trait Estimator: Send + Sync {
    fn estimate(&self, artifact: &ArtifactInfo) -> Requirement;
}

/// Returns the same requirement for every artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticEstimator {
    requirement: Requirement,
}

impl StaticEstimator {
    pub fn new(requirement: Requirement) -> Self {
        Self { requirement }
    }
}

impl Estimator for StaticEstimator {
    fn estimate(&self, _artifact: &ArtifactInfo) -> Requirement {
        self.requirement
    }
}
