//! redb table definitions for the Launchpad job store.
//!
//! Values are JSON-serialized [`Job`](crate::types::Job) records.

use redb::TableDefinition;

/// Job records keyed by job name.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");
