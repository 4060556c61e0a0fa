//! Shared types used across Launchpad crates.

use serde::{Deserialize, Serialize};

/// Identifier of a compute tier (e.g. `t2.medium`).
pub type TierId = String;

/// Opaque identifier of a provisioned remote compute resource.
pub type RemoteHandle = String;

/// Opaque locator of an object in the driver's storage.
pub type StorageLocator = String;

/// File name the remote program writes its result to.
pub const OUTPUT_FILE_NAME: &str = "output.txt";

/// Resource requirement produced by an estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub cpu_units: u32,
    pub memory_units: u32,
}

impl Requirement {
    pub fn new(cpu_units: u32, memory_units: u32) -> Self {
        Self {
            cpu_units,
            memory_units,
        }
    }
}

impl Default for Requirement {
    fn default() -> Self {
        Self::new(2, 4)
    }
}

/// A discrete compute capacity class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTier {
    pub id: TierId,
    pub cpu_units: u32,
    pub memory_units: u32,
}

impl InstanceTier {
    pub fn new(id: &str, cpu_units: u32, memory_units: u32) -> Self {
        Self {
            id: id.to_string(),
            cpu_units,
            memory_units,
        }
    }

    /// Whether this tier has at least the requested capacity.
    pub fn satisfies(&self, req: &Requirement) -> bool {
        self.cpu_units >= req.cpu_units && self.memory_units >= req.memory_units
    }
}

/// The stock tier list, ordered by ascending capacity.
pub fn default_tiers() -> Vec<InstanceTier> {
    vec![
        InstanceTier::new("t2.micro", 1, 1),
        InstanceTier::new("t2.small", 1, 2),
        InstanceTier::new("t2.medium", 2, 4),
        InstanceTier::new("t2.large", 2, 8),
        InstanceTier::new("m5.large", 2, 8),
        InstanceTier::new("m5.xlarge", 4, 16),
    ]
}

/// Storage key for an uploaded artifact: `{job}/{file_name}`.
pub fn artifact_key(job_name: &str, file_name: &str) -> String {
    format!("{job_name}/{file_name}")
}

/// Default storage key the remote program uploads its output to.
pub fn output_key(job_name: &str) -> String {
    format!("{job_name}/{OUTPUT_FILE_NAME}")
}
