//! launchpad-catalog — sizing a job to a compute tier.
//!
//! An [`Estimator`] turns artifact metadata into a [`Requirement`]; the
//! [`InstanceCatalog`] maps that requirement onto the first tier large
//! enough to hold it. Both are pure: nothing here touches the network.
//!
//! # Components
//!
//! - **`catalog`** — ordered tier list and first-fit selection
//! - **`estimator`** — the estimator seam and the stock static estimator
//!
//! [`Requirement`]: launchpad_core::Requirement

pub mod catalog;
pub mod estimator;

pub use catalog::{CatalogError, CatalogResult, InstanceCatalog, TierSelection};
pub use estimator::{ArtifactInfo, Estimator, StaticEstimator};
