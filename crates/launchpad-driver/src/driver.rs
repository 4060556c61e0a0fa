//! The compute driver trait.

use async_trait::async_trait;
use bytes::Bytes;

use launchpad_core::{RemoteHandle, StorageLocator};

use crate::error::DriverResult;

/// Remote compute and object storage, as seen by the orchestrator.
///
/// Calls may be slow and may fail. Callers own timeouts; implementations
/// should not retry internally.
#[async_trait]
pub trait ComputeDriver: Send + Sync {
    /// Launch an instance of `tier` that runs `bootstrap` on boot.
    ///
    /// Success means the provider accepted the request, not that the
    /// program has finished.
    async fn create_instance(&self, tier: &str, bootstrap: &str) -> DriverResult<RemoteHandle>;

    async fn stop_instance(&self, handle: &str) -> DriverResult<()>;

    /// Destroy an instance. Reports [`DriverError::UnknownInstance`] when
    /// the provider has no record of `handle`.
    ///
    /// [`DriverError::UnknownInstance`]: crate::DriverError::UnknownInstance
    async fn terminate_instance(&self, handle: &str) -> DriverResult<()>;

    async fn put_object(&self, key: &str, bytes: Bytes) -> DriverResult<StorageLocator>;

    async fn get_object(&self, locator: &str) -> DriverResult<Bytes>;

    async fn delete_object(&self, locator: &str) -> DriverResult<()>;

    /// Locator an object stored under `key` has (or would have).
    fn locate(&self, key: &str) -> StorageLocator;
}

/// Reject keys that could escape a storage root.
pub(crate) fn validate_key(key: &str) -> DriverResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(crate::DriverError::InvalidKey(key.to_string()));
    }
    Ok(())
}
