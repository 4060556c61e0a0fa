//! launchpad.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{InstanceTier, Requirement, default_tiers};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchpadConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub driver: DriverConfig,
    pub orchestrator: OrchestratorConfig,
    pub catalog: CatalogConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Base URL remote instances use to reach the completion endpoint.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            public_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/launchpad"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Objects on local disk, instances as local processes.
    #[default]
    Local,
    /// Everything in process memory; nothing actually runs.
    Memory,
}

impl std::str::FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(DriverKind::Local),
            "memory" => Ok(DriverKind::Memory),
            other => Err(format!("unknown driver kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub kind: DriverKind,
}

/// What happens to the remote resource when a job reports completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// The orchestrator terminates the instance after completion.
    #[default]
    Teardown,
    /// The instance shuts itself down; no driver call is made.
    SelfTerminating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub driver_timeout_secs: u64,
    pub completion: CompletionPolicy,
    pub purge_output_on_delete: bool,
    /// Requirement reported by the static estimator.
    pub requirement: Requirement,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            driver_timeout_secs: 120,
            completion: CompletionPolicy::default(),
            purge_output_on_delete: false,
            requirement: Requirement::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub tiers: Vec<InstanceTier>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Script handed to new instances. Placeholders: `{name}`,
    /// `{artifact}`, `{output}`, `{complete_url}`.
    pub template: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_BOOTSTRAP.to_string(),
        }
    }
}

const DEFAULT_BOOTSTRAP: &str = r#"#!/bin/sh
set -e
workdir=$(mktemp -d)
cp "{artifact}" "$workdir/program"
chmod +x "$workdir/program"
cd "$workdir"
./program
mkdir -p "$(dirname "{output}")"
cp "$workdir/output.txt" "{output}"
curl -fsS -X POST "{complete_url}"
"#;

impl BootstrapConfig {
    /// Fill the template placeholders for one job.
    pub fn render(&self, name: &str, artifact: &str, output: &str, complete_url: &str) -> String {
        self.template
            .replace("{name}", name)
            .replace("{artifact}", artifact)
            .replace("{output}", output)
            .replace("{complete_url}", complete_url)
    }
}

impl LaunchpadConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LaunchpadConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// URL an instance calls when its program has finished.
    pub fn complete_url(&self, job_name: &str) -> String {
        format!(
            "{}/projects/{job_name}/complete",
            self.server.public_url.trim_end_matches('/')
        )
    }
}
