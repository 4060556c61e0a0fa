//! Job records and the lifecycle state machine.
//!
//! [`JobState::can_transition_to`] is the single source of truth for which
//! state changes are legal. Everything that mutates a [`Job`] goes through
//! [`Job::transition`] or one of the field helpers below it, so a record
//! that violates the table never reaches a store.

use std::fmt;

use serde::{Deserialize, Serialize};

use launchpad_core::{RemoteHandle, StorageLocator, TierId};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Provisioning,
    Running,
    Stopping,
    Completed,
    Failed,
    Deleted,
}

impl JobState {
    /// States in which a job may hold a live remote handle.
    pub fn holds_remote(self) -> bool {
        matches!(
            self,
            JobState::Provisioning | JobState::Running | JobState::Stopping
        )
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    ///
    /// Same-state updates are always allowed; they carry field changes
    /// such as a new `last_error`.
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;

        if self == to {
            return self != Deleted;
        }
        matches!(
            (self, to),
            (Pending, Provisioning)
                | (Pending, Deleted)
                | (Provisioning, Running)
                | (Provisioning, Failed)
                | (Provisioning, Completed)
                | (Provisioning, Deleted)
                | (Running, Stopping)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Deleted)
                | (Stopping, Pending)
                | (Stopping, Completed)
                | (Stopping, Failed)
                | (Stopping, Deleted)
                | (Completed, Failed)
                | (Completed, Deleted)
                | (Failed, Provisioning)
                | (Failed, Deleted)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "Pending",
            JobState::Provisioning => "Provisioning",
            JobState::Running => "Running",
            JobState::Stopping => "Stopping",
            JobState::Completed => "Completed",
            JobState::Failed => "Failed",
            JobState::Deleted => "Deleted",
        };
        f.write_str(s)
    }
}

/// A state change that is not in the lifecycle table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} is not a valid transition", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// One user-submitted unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub artifact_location: StorageLocator,
    /// Hex SHA-256 of the uploaded artifact.
    pub artifact_sha256: String,
    pub artifact_size: u64,
    pub state: JobState,
    pub remote_handle: Option<RemoteHandle>,
    /// Tier chosen on the most recent start.
    pub tier: Option<TierId>,
    pub under_provisioned: bool,
    /// Handle whose termination failed and still needs cleaning up.
    pub pending_teardown: Option<RemoteHandle>,
    /// A delete was attempted and has not finished.
    pub delete_requested: bool,
    pub output_location: Option<StorageLocator>,
    pub last_error: Option<String>,
    /// Unix timestamp (seconds) when the job was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last change.
    pub updated_at: u64,
    /// Bumped by the store on every write; the compare-and-swap token.
    pub revision: u64,
}

impl Job {
    /// A freshly uploaded job in `Pending`.
    pub fn new(
        name: &str,
        artifact_location: StorageLocator,
        artifact_sha256: String,
        artifact_size: u64,
        now: u64,
    ) -> Self {
        Self {
            name: name.to_string(),
            artifact_location,
            artifact_sha256,
            artifact_size,
            state: JobState::Pending,
            remote_handle: None,
            tier: None,
            under_provisioned: false,
            pending_teardown: None,
            delete_requested: false,
            output_location: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Copy of this job moved to `to`, or an error if the table forbids it.
    ///
    /// Leaving `Completed` drops the output locator and leaving a
    /// handle-holding state drops the handle, so the field invariants hold
    /// for any legal transition.
    pub fn transition(&self, to: JobState, now: u64) -> Result<Job, InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        let mut next = self.clone();
        next.state = to;
        next.updated_at = now;
        if !to.holds_remote() {
            next.remote_handle = None;
        }
        if to != JobState::Completed {
            next.output_location = None;
        }
        if !matches!(to, JobState::Failed | JobState::Completed) {
            next.pending_teardown = None;
        }
        Ok(next)
    }

    /// The remote resource this job may still own, live or awaiting teardown.
    pub fn owned_remote(&self) -> Option<&RemoteHandle> {
        self.remote_handle.as_ref().or(self.pending_teardown.as_ref())
    }

    /// Check the record-level invariants. Returns a description of the
    /// first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.remote_handle.is_some() && !self.state.holds_remote() {
            return Err(format!("{}: remote handle held in {}", self.name, self.state));
        }
        if self.output_location.is_some() != (self.state == JobState::Completed) {
            return Err(format!(
                "{}: output location {:?} in {}",
                self.name, self.output_location, self.state
            ));
        }
        if self.remote_handle.is_some() && self.pending_teardown.is_some() {
            return Err(format!("{}: both a live handle and a pending teardown", self.name));
        }
        if self.pending_teardown.is_some()
            && !matches!(self.state, JobState::Failed | JobState::Completed)
        {
            return Err(format!("{}: pending teardown in {}", self.name, self.state));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("sim", "sim/p.exe".to_string(), "00".to_string(), 3, 1000)
    }

    #[test]
    fn new_job_is_pending_and_valid() {
        let j = job();
        assert_eq!(j.state, JobState::Pending);
        assert_eq!(j.revision, 0);
        assert!(j.check_invariants().is_ok());
    }

    #[test]
    fn lifecycle_edges() {
        use JobState::*;
        assert!(Pending.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Pending));
        assert!(Running.can_transition_to(Completed));
        assert!(Failed.can_transition_to(Provisioning));
        assert!(Completed.can_transition_to(Deleted));

        assert!(!Pending.can_transition_to(Stopping));
        assert!(!Pending.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Deleted.can_transition_to(Pending));
        assert!(!Deleted.can_transition_to(Deleted));
    }

    #[test]
    fn every_state_can_be_deleted() {
        use JobState::*;
        for s in [Pending, Provisioning, Running, Stopping, Completed, Failed] {
            assert!(s.can_transition_to(Deleted), "{s} -> Deleted");
        }
    }

    #[test]
    fn transition_rejects_invalid_edge() {
        let err = job().transition(JobState::Stopping, 2000).unwrap_err();
        assert_eq!(err.from, JobState::Pending);
        assert_eq!(err.to, JobState::Stopping);
        assert_eq!(err.to_string(), "Pending -> Stopping is not a valid transition");
    }

    #[test]
    fn leaving_live_states_drops_handle() {
        let mut running = job().transition(JobState::Provisioning, 1).unwrap();
        running = running.transition(JobState::Running, 2).unwrap();
        running.remote_handle = Some("i-1".to_string());
        assert!(running.check_invariants().is_ok());

        let stopping = running.transition(JobState::Stopping, 3).unwrap();
        assert_eq!(stopping.remote_handle.as_deref(), Some("i-1"));

        let pending = stopping.transition(JobState::Pending, 4).unwrap();
        assert!(pending.remote_handle.is_none());
        assert_eq!(pending.updated_at, 4);
        assert!(pending.check_invariants().is_ok());
    }

    #[test]
    fn leaving_completed_drops_output() {
        let mut done = job()
            .transition(JobState::Provisioning, 1)
            .unwrap()
            .transition(JobState::Running, 2)
            .unwrap()
            .transition(JobState::Completed, 3)
            .unwrap();
        done.output_location = Some("sim/output.txt".to_string());
        assert!(done.check_invariants().is_ok());

        let failed = done.transition(JobState::Failed, 4).unwrap();
        assert!(failed.output_location.is_none());
        assert!(failed.check_invariants().is_ok());
    }

    #[test]
    fn invariants_catch_stray_fields() {
        let mut j = job();
        j.remote_handle = Some("i-1".to_string());
        assert!(j.check_invariants().is_err());

        let mut j = job();
        j.output_location = Some("x".to_string());
        assert!(j.check_invariants().is_err());

        let mut j = job();
        j.pending_teardown = Some("i-1".to_string());
        assert!(j.check_invariants().is_err());
    }

    #[test]
    fn owned_remote_prefers_live_handle() {
        let mut j = job();
        assert!(j.owned_remote().is_none());
        j.pending_teardown = Some("i-old".to_string());
        assert_eq!(j.owned_remote().map(String::as_str), Some("i-old"));
    }
}
