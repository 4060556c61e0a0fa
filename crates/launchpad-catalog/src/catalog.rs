//! Instance catalog — first-fit tier selection.
//!
//! Tiers are scanned in the order they were configured. The first tier
//! whose CPU and memory both cover the requirement wins; there is no
//! re-sorting by cost. When nothing fits, the last (largest) tier is
//! returned and flagged as under-provisioned so the caller can report it.

use thiserror::Error;
use tracing::{debug, warn};

use launchpad_core::{InstanceTier, Requirement};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("instance catalog has no tiers")]
    Empty,
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Outcome of a tier selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSelection {
    pub tier: InstanceTier,
    /// No tier satisfied the requirement; `tier` is the largest available.
    pub under_provisioned: bool,
}

/// A non-empty, ordered list of compute tiers.
#[derive(Debug, Clone)]
pub struct InstanceCatalog {
    tiers: Vec<InstanceTier>,
}

impl InstanceCatalog {
    pub fn new(tiers: Vec<InstanceTier>) -> CatalogResult<Self> {
        if tiers.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[InstanceTier] {
        &self.tiers
    }

    /// Pick the tier for `req`. Total: always returns a tier.
    pub fn select_tier(&self, req: &Requirement) -> TierSelection {
        if let Some(tier) = self.tiers.iter().find(|t| t.satisfies(req)) {
            debug!(tier = %tier.id, cpu = req.cpu_units, mem = req.memory_units, "tier selected");
            return TierSelection {
                tier: tier.clone(),
                under_provisioned: false,
            };
        }

        // Constructor guarantees at least one tier.
        let largest = &self.tiers[self.tiers.len() - 1];
        warn!(
            tier = %largest.id,
            cpu = req.cpu_units,
            mem = req.memory_units,
            "no tier satisfies requirement, falling back to largest"
        );
        TierSelection {
            tier: largest.clone(),
            under_provisioned: true,
        }
    }
}

impl Default for InstanceCatalog {
    fn default() -> Self {
        Self {
            tiers: launchpad_core::default_tiers(),
        }
    }
}
