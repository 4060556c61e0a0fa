//! Local driver — a filesystem object store and `sh` processes as instances.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/objects/<key>           stored objects; the locator is the absolute path
//! <root>/instances/<handle>.sh   bootstrap script of each instance
//! <root>/instances/<handle>.log  combined stdout/stderr
//! ```
//!
//! An instance runs until its script exits or it is stopped/terminated.
//! A process cannot be resumed, so `stop` is a terminate: the process is
//! killed and the handle forgotten. Children that exit on their own are
//! reaped the next time the driver touches its instance table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use launchpad_core::{RemoteHandle, StorageLocator};

use crate::driver::{ComputeDriver, validate_key};
use crate::error::{DriverError, DriverResult};

pub struct LocalDriver {
    objects_dir: PathBuf,
    instances_dir: PathBuf,
    children: Mutex<HashMap<RemoteHandle, Child>>,
}

impl LocalDriver {
    /// Create the driver, making its directories under `root` if needed.
    pub async fn new(root: &Path) -> DriverResult<Self> {
        let objects_dir = root.join("objects");
        let instances_dir = root.join("instances");
        tokio::fs::create_dir_all(&objects_dir).await?;
        tokio::fs::create_dir_all(&instances_dir).await?;
        // Locators are absolute paths, so pin the root down.
        let objects_dir = tokio::fs::canonicalize(&objects_dir).await?;
        let instances_dir = tokio::fs::canonicalize(&instances_dir).await?;
        debug!(objects = ?objects_dir, "local driver ready");
        Ok(Self {
            objects_dir,
            instances_dir,
            children: Mutex::new(HashMap::new()),
        })
    }

    /// Number of instances the driver is still tracking.
    pub async fn tracked_instances(&self) -> usize {
        self.children.lock().await.len()
    }

    fn script_path(&self, handle: &str) -> PathBuf {
        self.instances_dir.join(format!("{handle}.sh"))
    }

    /// Map a locator back to a path, refusing anything outside the object root.
    fn object_path(&self, locator: &str) -> DriverResult<PathBuf> {
        let path = PathBuf::from(locator);
        let key = path
            .strip_prefix(&self.objects_dir)
            .map_err(|_| DriverError::InvalidKey(locator.to_string()))?;
        let key = key
            .to_str()
            .ok_or_else(|| DriverError::InvalidKey(locator.to_string()))?;
        validate_key(key)?;
        Ok(path)
    }

    /// Drop every child that has already exited. Returns their handles.
    fn reap(children: &mut HashMap<RemoteHandle, Child>) -> Vec<RemoteHandle> {
        let mut exited = Vec::new();
        children.retain(|handle, child| match child.try_wait() {
            Ok(Some(status)) => {
                debug!(%handle, %status, "instance exited on its own");
                exited.push(handle.clone());
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(%handle, error = %e, "could not poll instance");
                true
            }
        });
        exited
    }

    async fn remove_scripts(&self, handles: &[RemoteHandle]) {
        for handle in handles {
            if let Err(e) = tokio::fs::remove_file(self.script_path(handle)).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(%handle, error = %e, "could not remove bootstrap script");
                }
            }
        }
    }

    async fn kill(handle: &str, child: &mut Child) -> DriverResult<()> {
        match child.try_wait()? {
            Some(status) => {
                debug!(%handle, %status, "instance already exited");
            }
            None => {
                child.start_kill()?;
                let status = child.wait().await?;
                debug!(%handle, %status, "instance killed");
            }
        }
        Ok(())
    }

    /// Kill the process behind `handle` and forget it.
    async fn release(&self, handle: &str) -> DriverResult<()> {
        let mut children = self.children.lock().await;
        let mut child = children
            .remove(handle)
            .ok_or_else(|| DriverError::UnknownInstance(handle.to_string()))?;
        if let Err(e) = Self::kill(handle, &mut child).await {
            // Keep tracking it so a retry can try again.
            children.insert(handle.to_string(), child);
            return Err(e);
        }
        let mut gone = Self::reap(&mut children);
        drop(children);
        gone.push(handle.to_string());
        self.remove_scripts(&gone).await;
        Ok(())
    }
}

#[async_trait]
impl ComputeDriver for LocalDriver {
    async fn create_instance(&self, tier: &str, bootstrap: &str) -> DriverResult<RemoteHandle> {
        let handle = format!("local-{}", uuid::Uuid::new_v4().simple());
        let script = self.script_path(&handle);
        let log_path = self.instances_dir.join(format!("{handle}.log"));

        tokio::fs::write(&script, bootstrap).await?;
        let log = std::fs::File::create(&log_path)?;
        let log_err = log.try_clone()?;

        // Spawn and insert without an await in between, so a cancelled
        // create never leaves a process the table does not know about.
        let mut children = self.children.lock().await;
        let exited = Self::reap(&mut children);
        let child = Command::new("sh")
            .arg(&script)
            .env("LAUNCHPAD_TIER", tier)
            .env("LAUNCHPAD_INSTANCE", &handle)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DriverError::Instance(format!("spawn {handle}: {e}")))?;
        info!(%handle, %tier, pid = ?child.id(), "local instance started");
        children.insert(handle.clone(), child);
        drop(children);

        self.remove_scripts(&exited).await;
        Ok(handle)
    }

    async fn stop_instance(&self, handle: &str) -> DriverResult<()> {
        self.release(handle).await?;
        info!(%handle, "local instance stopped");
        Ok(())
    }

    async fn terminate_instance(&self, handle: &str) -> DriverResult<()> {
        self.release(handle).await?;
        info!(%handle, "local instance terminated");
        Ok(())
    }

    async fn put_object(&self, key: &str, bytes: Bytes) -> DriverResult<StorageLocator> {
        validate_key(key)?;
        let path = self.objects_dir.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        debug!(%key, size = bytes.len(), "object stored");
        Ok(self.locate(key))
    }

    async fn get_object(&self, locator: &str) -> DriverResult<Bytes> {
        let path = self.object_path(locator)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DriverError::ObjectNotFound(locator.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_object(&self, locator: &str) -> DriverResult<()> {
        let path = self.object_path(locator)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn locate(&self, key: &str) -> StorageLocator {
        self.objects_dir.join(key).to_string_lossy().into_owned()
    }
}
