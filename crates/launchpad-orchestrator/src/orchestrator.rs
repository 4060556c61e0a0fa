//! Orchestrator — drives jobs through their lifecycle.
//!
//! The `Orchestrator` is the only writer of job records. For every
//! mutating operation it:
//! - Takes the per-job operation lock, so operations on one job queue up
//! - Validates the request against the stored record
//! - Moves the record to an in-flight state with a compare-and-swap
//! - Calls the driver with no store lock held, under a timeout
//! - Finalizes or rolls back the record based on the driver's answer
//!
//! Reads (`list`, `get`, `download`) go straight to the store.

use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use launchpad_catalog::{ArtifactInfo, Estimator, InstanceCatalog};
use launchpad_core::config::{CompletionPolicy, OrchestratorConfig};
use launchpad_core::{StorageLocator, artifact_key, output_key};
use launchpad_driver::{ComputeDriver, DriverError, DriverResult};
use launchpad_state::{CasOutcome, Job, JobState, JobStore, StoreError};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::locks::JobLocks;

static JOB_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("job name pattern compiles")
});

/// Recorded as `last_error` when `create_instance` does not answer in time.
pub const PROVISIONING_TIMEOUT: &str = "provisioning timeout";

/// Recorded as `last_error` for jobs found mid-provisioning at startup.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Upper bound on any single driver call.
    pub driver_timeout: Duration,
    pub completion: CompletionPolicy,
    /// Also remove the output object when a completed job is deleted.
    pub purge_output_on_delete: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            driver_timeout: Duration::from_secs(config.driver_timeout_secs),
            completion: config.completion,
            purge_output_on_delete: config.purge_output_on_delete,
        }
    }
}

/// Check a job name: 1 to 64 characters of `[A-Za-z0-9._-]`, starting
/// with a letter or digit.
pub fn validate_name(name: &str) -> OrchestratorResult<()> {
    if JOB_NAME.is_match(name) {
        Ok(())
    } else {
        Err(OrchestratorError::Validation(format!(
            "invalid project name {name:?}"
        )))
    }
}

/// Reduce an uploaded file name to its last path component.
fn artifact_file_name(file_name: &str) -> OrchestratorResult<String> {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(OrchestratorError::Validation(format!(
            "invalid artifact file name {file_name:?}"
        )));
    }
    Ok(base.to_string())
}

/// The orchestrator owns job state and is the only caller of the driver.
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    driver: Arc<dyn ComputeDriver>,
    catalog: InstanceCatalog,
    estimator: Arc<dyn Estimator>,
    settings: OrchestratorSettings,
    locks: JobLocks,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        driver: Arc<dyn ComputeDriver>,
        catalog: InstanceCatalog,
        estimator: Arc<dyn Estimator>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            driver,
            catalog,
            estimator,
            settings,
            locks: JobLocks::default(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &InstanceCatalog {
        &self.catalog
    }

    /// Where a job's program is expected to leave its output.
    pub fn output_locator(&self, name: &str) -> StorageLocator {
        self.driver.locate(&output_key(name))
    }

    // ── Mutating operations ─────────────────────────────────────────

    /// Store an uploaded artifact and record a new `Pending` job.
    pub async fn create(&self, name: &str, file_name: &str, bytes: Bytes) -> OrchestratorResult<Job> {
        validate_name(name)?;
        let file_name = artifact_file_name(file_name)?;
        if bytes.is_empty() {
            return Err(OrchestratorError::Validation("artifact is empty".to_string()));
        }

        let _guard = self.locks.acquire(name).await;
        if self.store.get(name)?.is_some() {
            return Err(OrchestratorError::Validation(format!(
                "project {name} already exists"
            )));
        }

        let sha256 = hex::encode(Sha256::digest(&bytes));
        let size = bytes.len() as u64;
        let key = artifact_key(name, &file_name);
        let location = self
            .call("artifact upload", self.driver.put_object(&key, bytes))
            .await?;

        let job = Job::new(name, location, sha256, size, epoch_secs());
        match self.store.insert(&job) {
            Ok(job) => {
                info!(job = %name, size, sha256 = %job.artifact_sha256, "job created");
                Ok(job)
            }
            Err(StoreError::AlreadyExists(_)) => {
                warn!(job = %name, "job was created elsewhere during upload");
                Err(OrchestratorError::Validation(format!(
                    "project {name} already exists"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Provision an instance for the job and run `bootstrap` on it.
    ///
    /// Only `Pending` and `Failed` jobs that hold no remote resource can
    /// start. Returns the job in `Running` once the driver accepted the
    /// instance; a driver failure leaves it `Failed` with `last_error` set.
    pub async fn start(&self, name: &str, bootstrap: &str) -> OrchestratorResult<Job> {
        let _guard = self.locks.acquire(name).await;
        let job = self.load(name)?;

        if job.owned_remote().is_some() || job.state.holds_remote() {
            debug!(job = %name, state = %job.state, "start rejected, resource already held");
            return Err(OrchestratorError::AlreadyProvisioned(name.to_string()));
        }
        if !matches!(job.state, JobState::Pending | JobState::Failed) {
            return Err(conflict(&job, "start"));
        }

        let requirement = self.estimator.estimate(&ArtifactInfo {
            job_name: job.name.clone(),
            location: job.artifact_location.clone(),
            size: job.artifact_size,
            sha256: job.artifact_sha256.clone(),
        });
        let selection = self.catalog.select_tier(&requirement);
        let tier = selection.tier.id.clone();
        if selection.under_provisioned {
            warn!(
                job = %name,
                %tier,
                cpu = requirement.cpu_units,
                mem = requirement.memory_units,
                "job is under-provisioned"
            );
        }

        let mut next = advance(&job, JobState::Provisioning, "start")?;
        next.tier = Some(tier.clone());
        next.under_provisioned = selection.under_provisioned;
        next.delete_requested = false;
        next.last_error = None;
        let provisioning = self.commit(&job, next, "start")?;
        info!(job = %name, %tier, "provisioning instance");

        let created = self
            .call("instance creation", self.driver.create_instance(&tier, bootstrap))
            .await;

        match created {
            Ok(handle) => {
                let mut next = advance(&provisioning, JobState::Running, "start")?;
                next.remote_handle = Some(handle.clone());
                match self.commit(&provisioning, next, "start") {
                    Ok(job) => {
                        info!(job = %name, %handle, %tier, "job running");
                        Ok(job)
                    }
                    Err(e) => {
                        // Nothing records the handle, so it must not outlive this call.
                        error!(job = %name, %handle, error = %e, "could not record instance, terminating it");
                        if let Err(te) = self
                            .call("instance termination", self.driver.terminate_instance(&handle))
                            .await
                        {
                            error!(job = %name, %handle, error = %te, "instance orphaned");
                        }
                        Err(e)
                    }
                }
            }
            Err(e) => {
                error!(job = %name, %tier, error = %e, "provisioning failed");
                let mut next = advance(&provisioning, JobState::Failed, "start")?;
                next.last_error = Some(match &e {
                    DriverError::Timeout(_) => PROVISIONING_TIMEOUT.to_string(),
                    other => other.to_string(),
                });
                if let Err(se) = self.commit(&provisioning, next, "start") {
                    // Stuck in Provisioning until the next recover().
                    error!(
                        job = %name,
                        driver_error = %e,
                        store_error = %se,
                        "could not record failed provisioning, job left in Provisioning"
                    );
                    return Err(se);
                }
                Err(e.into())
            }
        }
    }

    /// Stop the job's instance and return the job to `Pending`.
    ///
    /// A failed driver stop leaves the job in `Stopping`; calling `stop`
    /// again retries.
    pub async fn stop(&self, name: &str) -> OrchestratorResult<Job> {
        let _guard = self.locks.acquire(name).await;
        let job = self.load(name)?;

        let stopping = match job.state {
            JobState::Running => {
                let next = advance(&job, JobState::Stopping, "stop")?;
                self.commit(&job, next, "stop")?
            }
            JobState::Stopping => {
                info!(job = %name, "retrying stop");
                job
            }
            _ => return Err(conflict(&job, "stop")),
        };

        if let Some(handle) = stopping.remote_handle.clone() {
            match self
                .call("instance stop", self.driver.stop_instance(&handle))
                .await
            {
                Ok(()) => info!(job = %name, %handle, "instance stopped"),
                Err(DriverError::UnknownInstance(_)) => {
                    warn!(job = %name, %handle, "instance already gone")
                }
                Err(e) => {
                    error!(job = %name, %handle, error = %e, "stop failed");
                    let mut next = advance(&stopping, JobState::Stopping, "stop")?;
                    next.last_error = Some(format!("stop failed: {e}"));
                    self.commit(&stopping, next, "stop")?;
                    return Err(e.into());
                }
            }
        }

        let mut next = advance(&stopping, JobState::Pending, "stop")?;
        next.last_error = None;
        self.commit(&stopping, next, "stop")
    }

    /// Record that the job's program finished.
    ///
    /// Idempotent: a job already `Completed` is returned unchanged with no
    /// further driver calls. `output` defaults to the job's output key.
    pub async fn notify_complete(
        &self,
        name: &str,
        output: Option<StorageLocator>,
    ) -> OrchestratorResult<Job> {
        let _guard = self.locks.acquire(name).await;
        let Some(job) = self.store.get(name)? else {
            warn!(job = %name, "completion for unknown job ignored");
            return Err(OrchestratorError::NotFound(name.to_string()));
        };

        match job.state {
            JobState::Completed => {
                debug!(job = %name, "duplicate completion");
                return Ok(job);
            }
            JobState::Running => {}
            JobState::Provisioning | JobState::Stopping => {
                warn!(job = %name, state = %job.state, "late completion accepted");
            }
            _ => {
                warn!(job = %name, state = %job.state, "completion rejected");
                return Err(conflict(&job, "complete"));
            }
        }

        let output = output.unwrap_or_else(|| self.output_locator(name));
        let mut next = advance(&job, JobState::Completed, "complete")?;
        next.output_location = Some(output);

        if let Some(handle) = job.remote_handle.clone() {
            match self.settings.completion {
                CompletionPolicy::SelfTerminating => {
                    debug!(job = %name, %handle, "instance terminates itself");
                }
                CompletionPolicy::Teardown => match self
                    .call("instance termination", self.driver.terminate_instance(&handle))
                    .await
                {
                    Ok(()) | Err(DriverError::UnknownInstance(_)) => {
                        debug!(job = %name, %handle, "instance torn down");
                    }
                    Err(e) => {
                        error!(job = %name, %handle, error = %e, "teardown after completion failed");
                        next.pending_teardown = Some(handle);
                        next.last_error = Some(format!("teardown failed: {e}"));
                    }
                },
            }
        }

        let job = self.commit(&job, next, "complete")?;
        info!(job = %name, output = ?job.output_location, "job completed");
        Ok(job)
    }

    /// Tear down anything the job holds, then remove it and its artifact.
    ///
    /// The record is only removed once termination is confirmed. On a
    /// failed termination the job is kept as `Failed` with the handle in
    /// `pending_teardown` so the delete can be retried.
    pub async fn delete(&self, name: &str) -> OrchestratorResult<Job> {
        let _guard = self.locks.acquire(name).await;
        let job = self.load(name)?;

        if let Some(handle) = job.owned_remote().cloned() {
            match self
                .call("instance termination", self.driver.terminate_instance(&handle))
                .await
            {
                Ok(()) => info!(job = %name, %handle, "instance terminated"),
                Err(DriverError::UnknownInstance(_)) => {
                    warn!(job = %name, %handle, "instance already gone")
                }
                Err(e) => {
                    error!(job = %name, %handle, error = %e, "teardown failed, job kept for retry");
                    let mut next = advance(&job, JobState::Failed, "delete")?;
                    next.pending_teardown = Some(handle);
                    next.delete_requested = true;
                    next.last_error = Some(format!("delete: teardown failed: {e}"));
                    self.commit(&job, next, "delete")?;
                    return Err(e.into());
                }
            }
        }

        if let CasOutcome::Mismatch(actual) = self.store.delete_if(name, job.revision)? {
            warn!(job = %name, expected = job.revision, "job changed during delete");
            return Err(match actual {
                Some(actual) => conflict(&actual, "delete"),
                None => OrchestratorError::NotFound(name.to_string()),
            });
        }

        self.discard(name, &job.artifact_location).await;
        if self.settings.purge_output_on_delete {
            if let Some(output) = &job.output_location {
                self.discard(name, output).await;
            }
        }
        info!(job = %name, "job deleted");

        let mut deleted = job;
        deleted.state = JobState::Deleted;
        deleted.remote_handle = None;
        deleted.pending_teardown = None;
        deleted.output_location = None;
        deleted.delete_requested = false;
        deleted.updated_at = epoch_secs();
        Ok(deleted)
    }

    /// Fail jobs whose provisioning was cut short by a restart.
    ///
    /// Call once at startup, before serving requests. Returns how many
    /// jobs were moved to `Failed`.
    pub fn recover(&self) -> OrchestratorResult<usize> {
        let mut recovered = 0;
        for job in self.store.list()? {
            match job.state {
                JobState::Provisioning => {
                    let mut next = advance(&job, JobState::Failed, "recover")?;
                    next.pending_teardown = job.remote_handle.clone();
                    next.last_error = Some(INTERRUPTED_BY_RESTART.to_string());
                    match self.commit(&job, next, "recover") {
                        Ok(_) => {
                            warn!(job = %job.name, "interrupted provisioning marked failed");
                            recovered += 1;
                        }
                        Err(OrchestratorError::Store(e)) => return Err(e.into()),
                        Err(e) => warn!(job = %job.name, error = %e, "could not recover job"),
                    }
                }
                JobState::Stopping => {
                    warn!(job = %job.name, "stop was interrupted; retry stop or delete");
                }
                _ => {}
            }
        }
        if recovered > 0 {
            info!(recovered, "recovery complete");
        }
        Ok(recovered)
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn list(&self) -> OrchestratorResult<Vec<Job>> {
        Ok(self.store.list()?)
    }

    pub fn get(&self, name: &str) -> OrchestratorResult<Job> {
        self.load(name)
    }

    /// Locator of a completed job's output.
    pub fn download(&self, name: &str) -> OrchestratorResult<StorageLocator> {
        let job = self.load(name)?;
        match (job.state, job.output_location) {
            (JobState::Completed, Some(location)) => Ok(location),
            _ => Err(OrchestratorError::NotCompleted(name.to_string())),
        }
    }

    /// Bytes of a completed job's output.
    pub async fn fetch_output(&self, name: &str) -> OrchestratorResult<Bytes> {
        let location = self.download(name)?;
        Ok(self
            .call("output download", self.driver.get_object(&location))
            .await?)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn load(&self, name: &str) -> OrchestratorResult<Job> {
        self.store
            .get(name)?
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))
    }

    /// Swap `current` for `next`, failing if the stored record moved on.
    fn commit(&self, current: &Job, next: Job, op: &'static str) -> OrchestratorResult<Job> {
        debug_assert!(next.check_invariants().is_ok(), "{:?}", next.check_invariants());
        match self.store.compare_and_swap(current.revision, &next)? {
            CasOutcome::Swapped(job) => Ok(job),
            CasOutcome::Mismatch(actual) => {
                warn!(
                    job = %current.name,
                    op,
                    expected = current.revision,
                    found = ?actual.as_ref().map(|j| j.revision),
                    "job changed underneath operation"
                );
                Err(match actual {
                    Some(actual) => conflict(&actual, op),
                    None => OrchestratorError::NotFound(current.name.clone()),
                })
            }
        }
    }

    /// Run a driver call under the configured timeout.
    async fn call<T>(
        &self,
        what: &str,
        fut: impl Future<Output = DriverResult<T>>,
    ) -> DriverResult<T> {
        match tokio::time::timeout(self.settings.driver_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(what.to_string())),
        }
    }

    /// Best-effort object removal.
    async fn discard(&self, name: &str, location: &str) {
        if let Err(e) = self
            .call("object removal", self.driver.delete_object(location))
            .await
        {
            warn!(job = %name, %location, error = %e, "could not remove object");
        }
    }
}

fn advance(job: &Job, to: JobState, op: &'static str) -> OrchestratorResult<Job> {
    job.transition(to, epoch_secs()).map_err(|e| {
        warn!(job = %job.name, op, error = %e, "transition rejected");
        conflict(job, op)
    })
}

fn conflict(job: &Job, op: &'static str) -> OrchestratorError {
    OrchestratorError::Conflict {
        job: job.name.clone(),
        state: job.state,
        op,
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_catalog::StaticEstimator;
    use launchpad_core::Requirement;
    use launchpad_driver::{DriverOp, MemoryDriver};
    use launchpad_state::{MemoryJobStore, StateStore, StoreResult};

    struct Harness {
        orch: Arc<Orchestrator>,
        driver: MemoryDriver,
        store: MemoryJobStore,
    }

    fn harness_with(settings: OrchestratorSettings, requirement: Requirement) -> Harness {
        let driver = MemoryDriver::new();
        let store = MemoryJobStore::new();
        let orch = Orchestrator::new(
            Arc::new(store.clone()),
            Arc::new(driver.clone()),
            InstanceCatalog::default(),
            Arc::new(StaticEstimator::new(requirement)),
            settings,
        );
        Harness {
            orch: Arc::new(orch),
            driver,
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(OrchestratorSettings::default(), Requirement::default())
    }

    async fn running(h: &Harness, name: &str) -> Job {
        h.orch
            .create(name, "program.exe", Bytes::from_static(b"binary"))
            .await
            .unwrap();
        h.orch.start(name, "#!/bin/sh\n./program.exe").await.unwrap()
    }

    fn assert_sound(job: &Job) {
        job.check_invariants().unwrap();
    }

    // ── create ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_records_pending_job() {
        let h = harness();
        let job = h
            .orch
            .create("sim", "program.exe", Bytes::from_static(b"binary"))
            .await
            .unwrap();

        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.artifact_location, "mem://sim/program.exe");
        assert_eq!(job.artifact_size, 6);
        assert_eq!(job.artifact_sha256.len(), 64);
        assert!(h.driver.object_exists("sim/program.exe"));
        assert_eq!(h.orch.get("sim").unwrap(), job);
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let h = harness();
        h.orch
            .create("sim", "program.exe", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let cases = [
            ("sim", "program.exe", &b"x"[..]),
            ("../etc", "program.exe", &b"x"[..]),
            ("", "program.exe", &b"x"[..]),
            ("other", "program.exe", &b""[..]),
            ("other", "..", &b"x"[..]),
        ];
        for (name, file, bytes) in cases {
            let err = h
                .orch
                .create(name, file, Bytes::copy_from_slice(bytes))
                .await
                .unwrap_err();
            assert!(
                matches!(err, OrchestratorError::Validation(_)),
                "{name}/{file}: {err}"
            );
        }
        assert_eq!(h.orch.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_keeps_only_the_base_file_name() {
        let h = harness();
        let job = h
            .orch
            .create("sim", "C:\\jobs\\program.exe", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(job.artifact_location, "mem://sim/program.exe");
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("sim-01.v2_final").is_ok());
        assert!(validate_name(&"a".repeat(64)).is_ok());
        assert!(validate_name(&"a".repeat(65)).is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("has space").is_err());
    }

    // ── start ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_runs_job_on_selected_tier() {
        let h = harness();
        let job = running(&h, "sim").await;

        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.tier.as_deref(), Some("t2.medium"));
        assert!(!job.under_provisioned);
        let handle = job.remote_handle.clone().unwrap();
        let instance = h.driver.instance(&handle).unwrap();
        assert_eq!(instance.tier, "t2.medium");
        assert_eq!(instance.bootstrap, "#!/bin/sh\n./program.exe");
        assert_sound(&job);
    }

    #[tokio::test]
    async fn oversized_requirement_is_flagged() {
        let h = harness_with(OrchestratorSettings::default(), Requirement::new(8, 32));
        let job = running(&h, "big").await;
        assert_eq!(job.tier.as_deref(), Some("m5.xlarge"));
        assert!(job.under_provisioned);
    }

    #[tokio::test]
    async fn second_start_is_already_provisioned() {
        let h = harness();
        running(&h, "sim").await;

        let err = h.orch.start("sim", "").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyProvisioned(_)));
        assert_eq!(h.driver.calls(DriverOp::Create), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_create_one_instance() {
        let h = harness();
        h.orch
            .create("sim", "program.exe", Bytes::from_static(b"binary"))
            .await
            .unwrap();
        h.driver.delay(DriverOp::Create, Duration::from_millis(50));

        let a = tokio::spawn({
            let orch = h.orch.clone();
            async move { orch.start("sim", "a").await }
        });
        let b = tokio::spawn({
            let orch = h.orch.clone();
            async move { orch.start("sim", "b").await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let ok: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_conflict()))
            .count();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].state, JobState::Running);
        assert_eq!(conflicts, 1);
        assert_eq!(h.driver.calls(DriverOp::Create), 1);
        assert_eq!(h.driver.live_instances().len(), 1);
        assert_sound(&h.orch.get("sim").unwrap());
    }

    /// Start `name` with a slow create, and return once the start is
    /// holding the job in `Provisioning`.
    async fn start_in_flight(
        h: &Harness,
        name: &str,
    ) -> tokio::task::JoinHandle<OrchestratorResult<Job>> {
        h.orch
            .create(name, "program.exe", Bytes::from_static(b"binary"))
            .await
            .unwrap();
        h.driver.delay(DriverOp::Create, Duration::from_millis(200));

        let task = tokio::spawn({
            let orch = h.orch.clone();
            let name = name.to_string();
            async move { orch.start(&name, "boot").await }
        });
        while h.orch.get(name).unwrap().state != JobState::Provisioning {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_waits_for_in_flight_start() {
        let h = harness();
        let start = start_in_flight(&h, "sim").await;

        let deleted = h.orch.delete("sim").await.unwrap();
        assert_eq!(deleted.state, JobState::Deleted);

        let started = start.await.unwrap().unwrap();
        assert_eq!(started.state, JobState::Running);
        assert_eq!(h.driver.calls(DriverOp::Create), 1);
        assert_eq!(h.driver.calls(DriverOp::Terminate), 1);
        assert!(h.driver.live_instances().is_empty());
        assert!(h.store.get("sim").unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn completion_waits_for_in_flight_start() {
        let h = harness();
        let start = start_in_flight(&h, "sim").await;

        let job = h.orch.notify_complete("sim", None).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.remote_handle.is_none());
        assert_sound(&job);

        assert_eq!(start.await.unwrap().unwrap().state, JobState::Running);
        assert_eq!(h.driver.calls(DriverOp::Terminate), 1);
        assert!(h.driver.live_instances().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_waits_for_in_flight_start() {
        let h = harness();
        let start = start_in_flight(&h, "sim").await;

        let job = h.orch.stop("sim").await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.remote_handle.is_none());

        assert_eq!(start.await.unwrap().unwrap().state, JobState::Running);
        assert_eq!(h.driver.calls(DriverOp::Stop), 1);
    }

    /// Store that refuses to record a move into one particular state.
    struct RefusingStore {
        inner: MemoryJobStore,
        refuse: JobState,
    }

    impl JobStore for RefusingStore {
        fn get(&self, name: &str) -> StoreResult<Option<Job>> {
            self.inner.get(name)
        }

        fn list(&self) -> StoreResult<Vec<Job>> {
            self.inner.list()
        }

        fn insert(&self, job: &Job) -> StoreResult<Job> {
            self.inner.insert(job)
        }

        fn compare_and_swap(&self, expected_revision: u64, next: &Job) -> StoreResult<CasOutcome> {
            if next.state == self.refuse {
                return Err(StoreError::Write("disk full".into()));
            }
            self.inner.compare_and_swap(expected_revision, next)
        }

        fn delete_if(&self, name: &str, expected_revision: u64) -> StoreResult<CasOutcome> {
            self.inner.delete_if(name, expected_revision)
        }
    }

    #[tokio::test]
    async fn unrecorded_start_failure_surfaces_store_error() {
        let driver = MemoryDriver::new();
        let inner = MemoryJobStore::new();
        let orch = Orchestrator::new(
            Arc::new(RefusingStore {
                inner: inner.clone(),
                refuse: JobState::Failed,
            }),
            Arc::new(driver.clone()),
            InstanceCatalog::default(),
            Arc::new(StaticEstimator::default()),
            OrchestratorSettings::default(),
        );
        orch.create("sim", "program.exe", Bytes::from_static(b"binary"))
            .await
            .unwrap();
        driver.fail(DriverOp::Create, "no capacity");

        let err = orch.start("sim", "").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Store(StoreError::Write(_))));
        assert_eq!(orch.get("sim").unwrap().state, JobState::Provisioning);
        assert!(driver.live_instances().is_empty());

        // A restart fails the stuck record once the store accepts writes.
        let restarted = Orchestrator::new(
            Arc::new(inner.clone()),
            Arc::new(driver),
            InstanceCatalog::default(),
            Arc::new(StaticEstimator::default()),
            OrchestratorSettings::default(),
        );
        assert_eq!(restarted.recover().unwrap(), 1);
        let job = restarted.get("sim").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.last_error.as_deref(), Some(INTERRUPTED_BY_RESTART));
    }

    #[tokio::test]
    async fn failed_start_records_error_and_can_retry() {
        let h = harness();
        h.orch
            .create("sim", "program.exe", Bytes::from_static(b"binary"))
            .await
            .unwrap();
        h.driver.fail(DriverOp::Create, "insufficient capacity");

        let err = h.orch.start("sim", "").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Driver(_)));
        let job = h.orch.get("sim").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.remote_handle.is_none());
        assert!(job.last_error.unwrap().contains("insufficient capacity"));

        h.driver.clear_failure(DriverOp::Create);
        let job = h.orch.start("sim", "").await.unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.last_error.is_none());
    }

    #[tokio::test]
    async fn slow_provisioning_times_out() {
        let settings = OrchestratorSettings {
            driver_timeout: Duration::from_millis(50),
            ..OrchestratorSettings::default()
        };
        let h = harness_with(settings, Requirement::default());
        h.orch
            .create("sim", "program.exe", Bytes::from_static(b"binary"))
            .await
            .unwrap();
        h.driver.delay(DriverOp::Create, Duration::from_millis(500));

        let err = h.orch.start("sim", "").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Driver(DriverError::Timeout(_))));
        let job = h.orch.get("sim").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.last_error.as_deref(), Some(PROVISIONING_TIMEOUT));
    }

    #[tokio::test]
    async fn start_unknown_job_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.orch.start("ghost", "").await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    // ── stop ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn stop_on_pending_is_conflict() {
        let h = harness();
        let before = h
            .orch
            .create("sim", "program.exe", Bytes::from_static(b"binary"))
            .await
            .unwrap();

        let err = h.orch.stop("sim").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Conflict { state: JobState::Pending, .. }
        ));
        assert_eq!(h.orch.get("sim").unwrap(), before);
        assert_eq!(h.driver.calls(DriverOp::Stop), 0);
    }

    #[tokio::test]
    async fn stop_returns_job_to_pending() {
        let h = harness();
        running(&h, "sim").await;

        let job = h.orch.stop("sim").await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.remote_handle.is_none());
        assert_eq!(h.driver.calls(DriverOp::Stop), 1);
        assert_sound(&job);

        // Resumable: a new start provisions again.
        let job = h.orch.start("sim", "").await.unwrap();
        assert_eq!(job.state, JobState::Running);
    }

    #[tokio::test]
    async fn failed_stop_stays_stopping_until_retried() {
        let h = harness();
        let started = running(&h, "sim").await;
        h.driver.fail(DriverOp::Stop, "api unavailable");

        assert!(h.orch.stop("sim").await.is_err());
        let job = h.orch.get("sim").unwrap();
        assert_eq!(job.state, JobState::Stopping);
        assert_eq!(job.remote_handle, started.remote_handle);
        assert!(job.last_error.is_some());

        h.driver.clear_failure(DriverOp::Stop);
        let job = h.orch.stop("sim").await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.last_error.is_none());
    }

    // ── notify_complete ─────────────────────────────────────────────

    #[tokio::test]
    async fn completion_is_idempotent() {
        let h = harness();
        running(&h, "sim").await;

        let first = h.orch.notify_complete("sim", None).await.unwrap();
        assert_eq!(first.state, JobState::Completed);
        assert_eq!(first.output_location.as_deref(), Some("mem://sim/output.txt"));
        assert!(first.remote_handle.is_none());
        assert_eq!(h.driver.calls(DriverOp::Terminate), 1);
        assert!(h.driver.live_instances().is_empty());

        let second = h.orch.notify_complete("sim", None).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(h.driver.calls(DriverOp::Terminate), 1);
    }

    #[tokio::test]
    async fn self_terminating_completion_skips_teardown() {
        let settings = OrchestratorSettings {
            completion: CompletionPolicy::SelfTerminating,
            ..OrchestratorSettings::default()
        };
        let h = harness_with(settings, Requirement::default());
        running(&h, "sim").await;

        let job = h
            .orch
            .notify_complete("sim", Some("mem://elsewhere/out.txt".to_string()))
            .await
            .unwrap();
        assert_eq!(job.output_location.as_deref(), Some("mem://elsewhere/out.txt"));
        assert!(job.remote_handle.is_none());
        assert_eq!(h.driver.calls(DriverOp::Terminate), 0);
    }

    #[tokio::test]
    async fn failed_teardown_after_completion_is_kept_for_delete() {
        let h = harness();
        let started = running(&h, "sim").await;
        let handle = started.remote_handle.unwrap();
        h.driver.fail(DriverOp::Terminate, "throttled");

        let job = h.orch.notify_complete("sim", None).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.remote_handle.is_none());
        assert_eq!(job.pending_teardown.as_deref(), Some(handle.as_str()));
        assert!(job.last_error.unwrap().contains("throttled"));

        h.driver.clear_failure(DriverOp::Terminate);
        h.orch.delete("sim").await.unwrap();
        assert!(h.driver.live_instances().is_empty());
    }

    #[tokio::test]
    async fn completion_outside_running_states() {
        let h = harness();
        h.orch
            .create("sim", "program.exe", Bytes::from_static(b"binary"))
            .await
            .unwrap();

        assert!(matches!(
            h.orch.notify_complete("sim", None).await,
            Err(OrchestratorError::Conflict { state: JobState::Pending, .. })
        ));
        assert!(matches!(
            h.orch.notify_complete("ghost", None).await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn late_completion_while_stopping_is_accepted() {
        let h = harness();
        running(&h, "sim").await;
        h.driver.fail(DriverOp::Stop, "api unavailable");
        let _ = h.orch.stop("sim").await;
        assert_eq!(h.orch.get("sim").unwrap().state, JobState::Stopping);

        let job = h.orch.notify_complete("sim", None).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(h.driver.live_instances().is_empty());
    }

    #[tokio::test]
    async fn completion_after_delete_is_not_found() {
        let h = harness();
        running(&h, "sim").await;
        h.orch.delete("sim").await.unwrap();

        assert!(matches!(
            h.orch.notify_complete("sim", None).await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    // ── delete ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn delete_pending_removes_record_and_artifact() {
        let h = harness();
        h.orch
            .create("sim", "program.exe", Bytes::from_static(b"binary"))
            .await
            .unwrap();

        let job = h.orch.delete("sim").await.unwrap();
        assert_eq!(job.state, JobState::Deleted);
        assert!(matches!(h.orch.get("sim"), Err(OrchestratorError::NotFound(_))));
        assert!(!h.driver.object_exists("sim/program.exe"));
        assert_eq!(h.driver.calls(DriverOp::Terminate), 0);
    }

    #[tokio::test]
    async fn failed_teardown_keeps_job_for_retry() {
        let h = harness();
        let started = running(&h, "sim").await;
        let handle = started.remote_handle.unwrap();
        h.driver.fail(DriverOp::Terminate, "throttled");

        let err = h.orch.delete("sim").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Driver(_)));

        let job = h.orch.get("sim").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.delete_requested);
        assert_eq!(job.pending_teardown.as_deref(), Some(handle.as_str()));
        assert!(job.remote_handle.is_none());
        assert_sound(&job);
        assert_eq!(h.driver.live_instances(), vec![handle.clone()]);
        assert!(h.driver.object_exists("sim/program.exe"));

        // A start must not provision a second instance meanwhile.
        assert!(matches!(
            h.orch.start("sim", "").await,
            Err(OrchestratorError::AlreadyProvisioned(_))
        ));

        h.driver.clear_failure(DriverOp::Terminate);
        h.orch.delete("sim").await.unwrap();
        assert!(h.driver.live_instances().is_empty());
        assert!(h.store.get("sim").unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_treats_vanished_instance_as_terminated() {
        let h = harness();
        let started = running(&h, "sim").await;
        h.driver
            .terminate_instance(started.remote_handle.as_deref().unwrap())
            .await
            .unwrap();

        let job = h.orch.delete("sim").await.unwrap();
        assert_eq!(job.state, JobState::Deleted);
    }

    #[tokio::test]
    async fn delete_purges_output_when_configured() {
        let settings = OrchestratorSettings {
            purge_output_on_delete: true,
            ..OrchestratorSettings::default()
        };
        let h = harness_with(settings, Requirement::default());
        running(&h, "sim").await;
        h.driver.seed_object("sim/output.txt", "42");
        h.orch.notify_complete("sim", None).await.unwrap();

        h.orch.delete("sim").await.unwrap();
        assert!(!h.driver.object_exists("sim/output.txt"));
    }

    #[tokio::test]
    async fn delete_keeps_output_by_default() {
        let h = harness();
        running(&h, "sim").await;
        h.driver.seed_object("sim/output.txt", "42");
        h.orch.notify_complete("sim", None).await.unwrap();

        h.orch.delete("sim").await.unwrap();
        assert!(h.driver.object_exists("sim/output.txt"));
    }

    // ── download ────────────────────────────────────────────────────

    #[tokio::test]
    async fn upload_start_complete_download_roundtrip() {
        let h = harness();
        running(&h, "sim").await;
        h.driver.seed_object("sim/output.txt", "result: 42\n");
        h.orch.notify_complete("sim", None).await.unwrap();

        assert_eq!(h.orch.download("sim").unwrap(), "mem://sim/output.txt");
        let bytes = h.orch.fetch_output("sim").await.unwrap();
        assert_eq!(bytes, Bytes::from_static(b"result: 42\n"));
    }

    #[tokio::test]
    async fn download_requires_completion() {
        let h = harness();
        running(&h, "sim").await;

        assert!(matches!(
            h.orch.download("sim"),
            Err(OrchestratorError::NotCompleted(_))
        ));
        assert!(matches!(
            h.orch.download("ghost"),
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_output_object_is_a_driver_error() {
        let h = harness();
        running(&h, "sim").await;
        h.orch.notify_complete("sim", None).await.unwrap();

        assert!(matches!(
            h.orch.fetch_output("sim").await,
            Err(OrchestratorError::Driver(DriverError::ObjectNotFound(_)))
        ));
    }

    // ── recover ─────────────────────────────────────────────────────

    #[test]
    fn recover_fails_interrupted_provisioning() {
        let h = harness();
        let job = h
            .store
            .insert(&Job::new("sim", "mem://sim/p".to_string(), String::new(), 1, 0))
            .unwrap();
        let mut provisioning = job.transition(JobState::Provisioning, 1).unwrap();
        provisioning.remote_handle = Some("mem-0042".to_string());
        h.store.compare_and_swap(job.revision, &provisioning).unwrap();

        assert_eq!(h.orch.recover().unwrap(), 1);
        let job = h.orch.get("sim").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.pending_teardown.as_deref(), Some("mem-0042"));
        assert_eq!(job.last_error.as_deref(), Some(INTERRUPTED_BY_RESTART));
        assert_sound(&job);

        // Nothing left to do on a second pass.
        assert_eq!(h.orch.recover().unwrap(), 0);
    }

    // ── durable store ───────────────────────────────────────────────

    #[tokio::test]
    async fn lifecycle_on_redb_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(&dir.path().join("launchpad.redb")).unwrap();
        let driver = MemoryDriver::new();
        let orch = Orchestrator::new(
            Arc::new(store.clone()),
            Arc::new(driver.clone()),
            InstanceCatalog::default(),
            Arc::new(StaticEstimator::default()),
            OrchestratorSettings::default(),
        );

        orch.create("sim", "program.exe", Bytes::from_static(b"binary"))
            .await
            .unwrap();
        orch.start("sim", "").await.unwrap();
        driver.seed_object("sim/output.txt", "done");
        let job = orch.notify_complete("sim", None).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(store.get("sim").unwrap().unwrap(), job);
        assert_eq!(orch.fetch_output("sim").await.unwrap(), Bytes::from_static(b"done"));
    }
}
