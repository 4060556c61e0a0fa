//! StateStore — redb-backed job persistence for Launchpad.
//!
//! All values are JSON-serialized into redb's `&[u8]` value column. redb
//! runs one write transaction at a time, so a read-compare-write inside a
//! single write transaction is an atomic compare-and-swap. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write went through. Carries the record as now stored (or, for a
    /// delete, as it was before removal).
    Swapped(Job),
    /// The stored revision did not match. Carries what is actually stored.
    Mismatch(Option<Job>),
}

impl CasOutcome {
    pub fn is_swapped(&self) -> bool {
        matches!(self, CasOutcome::Swapped(_))
    }
}

/// A keyed job record store with atomic compare-and-swap.
///
/// Implementations must make `insert`, `compare_and_swap` and
/// `delete_if` atomic with respect to each other. Calls are expected to be
/// short; nothing here performs network I/O.
pub trait JobStore: Send + Sync {
    /// Fetch one job by name.
    fn get(&self, name: &str) -> StoreResult<Option<Job>>;

    /// All jobs, ordered by name.
    fn list(&self) -> StoreResult<Vec<Job>>;

    /// Insert a new job. Fails with [`StoreError::AlreadyExists`] if the
    /// name is taken. Returns the stored record (revision 1).
    fn insert(&self, job: &Job) -> StoreResult<Job>;

    /// Replace the job named `next.name` if its stored revision equals
    /// `expected_revision`. The stored copy gets `expected_revision + 1`.
    fn compare_and_swap(&self, expected_revision: u64, next: &Job) -> StoreResult<CasOutcome>;

    /// Remove the job if its stored revision equals `expected_revision`.
    fn delete_if(&self, name: &str, expected_revision: u64) -> StoreResult<CasOutcome>;
}

/// Thread-safe job store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "job store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory job store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> StoreResult<Job> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn encode(job: &Job) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(job).map_err(map_err!(Serialize))
}

impl JobStore for StateStore {
    fn get(&self, name: &str) -> StoreResult<Option<Job>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> StoreResult<Vec<Job>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    fn insert(&self, job: &Job) -> StoreResult<Job> {
        let mut stored = job.clone();
        stored.revision = 1;
        let value = encode(&stored)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            if table.get(job.name.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StoreError::AlreadyExists(job.name.clone()));
            }
            table
                .insert(job.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(job = %job.name, "job inserted");
        Ok(stored)
    }

    fn compare_and_swap(&self, expected_revision: u64, next: &Job) -> StoreResult<CasOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let current = match table.get(next.name.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            match current {
                Some(cur) if cur.revision == expected_revision => {
                    let mut stored = next.clone();
                    stored.revision = expected_revision + 1;
                    let value = encode(&stored)?;
                    table
                        .insert(next.name.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    CasOutcome::Swapped(stored)
                }
                other => CasOutcome::Mismatch(other),
            }
        };
        if outcome.is_swapped() {
            txn.commit().map_err(map_err!(Transaction))?;
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(outcome)
    }

    fn delete_if(&self, name: &str, expected_revision: u64) -> StoreResult<CasOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let current = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            match current {
                Some(cur) if cur.revision == expected_revision => {
                    table.remove(name).map_err(map_err!(Write))?;
                    CasOutcome::Swapped(cur)
                }
                other => CasOutcome::Mismatch(other),
            }
        };
        if outcome.is_swapped() {
            txn.commit().map_err(map_err!(Transaction))?;
            debug!(job = %name, "job deleted");
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(outcome)
    }
}
