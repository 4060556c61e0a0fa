//! launchpad-driver — the seam between the orchestrator and a compute
//! provider.
//!
//! [`ComputeDriver`] covers the five provider calls the orchestrator makes
//! (create/stop/terminate an instance, put/get an object) plus object
//! removal. Every call returns an explicit [`DriverResult`]; nothing is
//! fire-and-forget.
//!
//! Two drivers ship here:
//!
//! - [`MemoryDriver`] keeps objects and instances in process memory, with
//!   failure injection and call counters for tests.
//! - [`LocalDriver`] stores objects under a directory and runs each
//!   instance's bootstrap script as a local `sh` process.

pub mod driver;
pub mod error;
pub mod local;
pub mod memory;

pub use driver::ComputeDriver;
pub use error::{DriverError, DriverResult};
pub use local::LocalDriver;
pub use memory::{DriverOp, MemoryDriver};
