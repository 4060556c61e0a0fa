//! launchpad-state — job records and the stores that hold them.
//!
//! A [`JobStore`] is a keyed record store with atomic compare-and-swap.
//! Two implementations ship here:
//!
//! - [`StateStore`], backed by [redb](https://docs.rs/redb), on disk or in
//!   memory. Jobs are JSON-serialized into redb's `&[u8]` value column.
//! - [`MemoryJobStore`], a `BTreeMap` behind a mutex, for tests and
//!   throwaway daemons.
//!
//! Every write bumps the record's `revision`; a swap succeeds only when the
//! caller's expected revision matches the stored one.

pub mod error;
pub mod memory;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use store::{CasOutcome, JobStore, StateStore};
pub use types::*;
