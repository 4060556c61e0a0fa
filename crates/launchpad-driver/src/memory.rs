//! In-process driver.
//!
//! Objects live in a map, instances are bookkeeping entries. Tests can make
//! any operation fail or stall and can count how often each was called.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use launchpad_core::{RemoteHandle, StorageLocator};

use crate::driver::{ComputeDriver, validate_key};
use crate::error::{DriverError, DriverResult};

const SCHEME: &str = "mem://";

/// Driver operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
    Create,
    Stop,
    Terminate,
    Put,
    Get,
    Delete,
}

/// Lifecycle of a simulated instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MemoryInstance {
    pub tier: String,
    pub bootstrap: String,
    pub status: InstanceStatus,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Bytes>,
    instances: HashMap<RemoteHandle, MemoryInstance>,
    next_instance: u64,
    calls: HashMap<DriverOp, usize>,
    failing: HashMap<DriverOp, String>,
    delays: HashMap<DriverOp, Duration>,
}

#[derive(Clone, Default)]
pub struct MemoryDriver {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the maps are
        // still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every call to `op` fail with `message` until cleared.
    pub fn fail(&self, op: DriverOp, message: &str) {
        self.inner().failing.insert(op, message.to_string());
    }

    pub fn clear_failure(&self, op: DriverOp) {
        self.inner().failing.remove(&op);
    }

    /// Sleep for `delay` at the start of every call to `op`.
    pub fn delay(&self, op: DriverOp, delay: Duration) {
        self.inner().delays.insert(op, delay);
    }

    /// Number of times `op` has been called, failed calls included.
    pub fn calls(&self, op: DriverOp) -> usize {
        self.inner().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn instance(&self, handle: &str) -> Option<MemoryInstance> {
        self.inner().instances.get(handle).cloned()
    }

    /// Handles of instances that have not been terminated.
    pub fn live_instances(&self) -> Vec<RemoteHandle> {
        let mut handles: Vec<_> = self.inner().instances.keys().cloned().collect();
        handles.sort();
        handles
    }

    pub fn object_exists(&self, key: &str) -> bool {
        self.inner().objects.contains_key(key)
    }

    /// Store an object directly, as a remote program would.
    pub fn seed_object(&self, key: &str, bytes: impl Into<Bytes>) -> StorageLocator {
        self.inner().objects.insert(key.to_string(), bytes.into());
        self.locate(key)
    }

    /// Record the call, wait out any configured delay, then report an
    /// injected failure if one is set.
    async fn enter(&self, op: DriverOp) -> DriverResult<()> {
        let delay = {
            let mut inner = self.inner();
            *inner.calls.entry(op).or_default() += 1;
            inner.delays.get(&op).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.inner().failing.get(&op) {
            return Err(match op {
                DriverOp::Create | DriverOp::Stop | DriverOp::Terminate => {
                    DriverError::Instance(message.clone())
                }
                _ => DriverError::Storage(message.clone()),
            });
        }
        Ok(())
    }
}

fn key_of(locator: &str) -> &str {
    locator.strip_prefix(SCHEME).unwrap_or(locator)
}

#[async_trait]
impl ComputeDriver for MemoryDriver {
    async fn create_instance(&self, tier: &str, bootstrap: &str) -> DriverResult<RemoteHandle> {
        self.enter(DriverOp::Create).await?;
        let mut inner = self.inner();
        inner.next_instance += 1;
        let handle = format!("mem-{:04}", inner.next_instance);
        inner.instances.insert(
            handle.clone(),
            MemoryInstance {
                tier: tier.to_string(),
                bootstrap: bootstrap.to_string(),
                status: InstanceStatus::Running,
            },
        );
        debug!(%handle, %tier, "instance created");
        Ok(handle)
    }

    async fn stop_instance(&self, handle: &str) -> DriverResult<()> {
        self.enter(DriverOp::Stop).await?;
        let mut inner = self.inner();
        let instance = inner
            .instances
            .get_mut(handle)
            .ok_or_else(|| DriverError::UnknownInstance(handle.to_string()))?;
        instance.status = InstanceStatus::Stopped;
        Ok(())
    }

    async fn terminate_instance(&self, handle: &str) -> DriverResult<()> {
        self.enter(DriverOp::Terminate).await?;
        self.inner()
            .instances
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| DriverError::UnknownInstance(handle.to_string()))
    }

    async fn put_object(&self, key: &str, bytes: Bytes) -> DriverResult<StorageLocator> {
        validate_key(key)?;
        self.enter(DriverOp::Put).await?;
        self.inner().objects.insert(key.to_string(), bytes);
        Ok(self.locate(key))
    }

    async fn get_object(&self, locator: &str) -> DriverResult<Bytes> {
        self.enter(DriverOp::Get).await?;
        self.inner()
            .objects
            .get(key_of(locator))
            .cloned()
            .ok_or_else(|| DriverError::ObjectNotFound(locator.to_string()))
    }

    async fn delete_object(&self, locator: &str) -> DriverResult<()> {
        self.enter(DriverOp::Delete).await?;
        self.inner().objects.remove(key_of(locator));
        Ok(())
    }

    fn locate(&self, key: &str) -> StorageLocator {
        format!("{SCHEME}{key}")
    }
}
