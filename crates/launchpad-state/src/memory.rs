//! In-process job store: a `BTreeMap` behind a mutex.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{StoreError, StoreResult};
use crate::store::{CasOutcome, JobStore};
use crate::types::Job;

#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<BTreeMap<String, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, BTreeMap<String, Job>>> {
        self.jobs.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, name: &str) -> StoreResult<Option<Job>> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn list(&self) -> StoreResult<Vec<Job>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn insert(&self, job: &Job) -> StoreResult<Job> {
        let mut jobs = self.lock()?;
        if jobs.contains_key(&job.name) {
            return Err(StoreError::AlreadyExists(job.name.clone()));
        }
        let mut stored = job.clone();
        stored.revision = 1;
        jobs.insert(job.name.clone(), stored.clone());
        Ok(stored)
    }

    fn compare_and_swap(&self, expected_revision: u64, next: &Job) -> StoreResult<CasOutcome> {
        let mut jobs = self.lock()?;
        match jobs.get_mut(&next.name) {
            Some(cur) if cur.revision == expected_revision => {
                let mut stored = next.clone();
                stored.revision = expected_revision + 1;
                *cur = stored.clone();
                Ok(CasOutcome::Swapped(stored))
            }
            other => Ok(CasOutcome::Mismatch(other.cloned())),
        }
    }

    fn delete_if(&self, name: &str, expected_revision: u64) -> StoreResult<CasOutcome> {
        let mut jobs = self.lock()?;
        let matches = jobs
            .get(name)
            .is_some_and(|cur| cur.revision == expected_revision);
        if !matches {
            return Ok(CasOutcome::Mismatch(jobs.get(name).cloned()));
        }
        Ok(jobs
            .remove(name)
            .map_or(CasOutcome::Mismatch(None), CasOutcome::Swapped))
    }
}
