//! launchpadd — assembles the daemon from a [`LaunchpadConfig`].
//!
//! The binary in `main.rs` only parses flags, sets up logging and serves
//! the router built here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use launchpad_api::ApiState;
use launchpad_catalog::{InstanceCatalog, StaticEstimator};
use launchpad_core::LaunchpadConfig;
use launchpad_core::config::DriverKind;
use launchpad_driver::{ComputeDriver, LocalDriver, MemoryDriver};
use launchpad_orchestrator::{Orchestrator, OrchestratorSettings};
use launchpad_state::{JobStore, MemoryJobStore, StateStore};

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub driver: Option<DriverKind>,
}

/// Read the config file (or defaults) and apply `overrides`.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<LaunchpadConfig> {
    let mut config = match path {
        Some(path) => {
            let config = LaunchpadConfig::from_file(path)?;
            info!(path = ?path, "config loaded");
            config
        }
        None => LaunchpadConfig::default(),
    };

    if let Some(port) = overrides.port {
        // Keep the default callback URL pointing at the port we listen on.
        let default_url = format!("http://localhost:{}", config.server.port);
        if config.server.public_url == default_url {
            config.server.public_url = format!("http://localhost:{port}");
        }
        config.server.port = port;
    }
    if let Some(data_dir) = &overrides.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(driver) = overrides.driver {
        config.driver.kind = driver;
    }
    Ok(config)
}

/// Open the store and driver, build the orchestrator and recover any
/// jobs a previous run left mid-provisioning.
///
/// With `in_memory` the job store lives only as long as the process.
pub async fn build_state(config: LaunchpadConfig, in_memory: bool) -> anyhow::Result<ApiState> {
    let data_dir = config.storage.data_dir.clone();

    let store: Arc<dyn JobStore> = if in_memory {
        info!("using in-memory job store");
        Arc::new(MemoryJobStore::new())
    } else {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join("launchpad.redb");
        let store = StateStore::open(&db_path)?;
        info!(path = ?db_path, "state store opened");
        Arc::new(store)
    };

    let driver: Arc<dyn ComputeDriver> = match config.driver.kind {
        DriverKind::Memory => {
            warn!("memory driver selected; instances will not run anything");
            Arc::new(MemoryDriver::new())
        }
        DriverKind::Local => {
            let root = data_dir.join("driver");
            let driver = LocalDriver::new(&root).await?;
            info!(root = ?root, "local driver initialized");
            Arc::new(driver)
        }
    };

    let catalog = InstanceCatalog::new(config.catalog.tiers.clone())?;
    info!(tiers = catalog.tiers().len(), "instance catalog loaded");

    let orchestrator = Orchestrator::new(
        store,
        driver,
        catalog,
        Arc::new(StaticEstimator::new(config.orchestrator.requirement)),
        OrchestratorSettings::from(&config.orchestrator),
    );
    let recovered = orchestrator.recover()?;
    if recovered > 0 {
        warn!(recovered, "jobs interrupted by the last shutdown were marked failed");
    }

    Ok(ApiState {
        orchestrator: Arc::new(orchestrator),
        config: Arc::new(config),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_override_moves_default_public_url() {
        let overrides = Overrides {
            port: Some(8080),
            ..Overrides::default()
        };
        let config = load_config(None, &overrides).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.public_url, "http://localhost:8080");
    }

    #[test]
    fn file_values_and_overrides_combine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launchpad.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\npublic_url = \"https://launchpad.example.com\"\n\n[driver]\nkind = \"local\"\n",
        )
        .unwrap();

        let overrides = Overrides {
            port: Some(9100),
            driver: Some(DriverKind::Memory),
            ..Overrides::default()
        };
        let config = load_config(Some(&path), &overrides).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.public_url, "https://launchpad.example.com");
        assert_eq!(config.driver.kind, DriverKind::Memory);
    }

    #[tokio::test]
    async fn build_state_with_durable_store_and_local_driver() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = Overrides {
            data_dir: Some(dir.path().to_path_buf()),
            ..Overrides::default()
        };
        let config = load_config(None, &overrides).unwrap();

        let state = build_state(config, false).await.unwrap();
        assert!(state.orchestrator.list().unwrap().is_empty());
        assert!(dir.path().join("launchpad.redb").exists());
        assert!(dir.path().join("driver/objects").is_dir());
    }

    #[tokio::test]
    async fn empty_catalog_is_rejected() {
        let mut config = LaunchpadConfig::default();
        config.driver.kind = DriverKind::Memory;
        config.catalog.tiers.clear();
        assert!(build_state(config, true).await.is_err());
    }
}
