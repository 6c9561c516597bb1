//! Capacity lookup.

use tracing::{debug, info};

use crate::providers::{CapacityReport, CapacityService, ProviderError};

/// Pick the first metro (in metro-code order) where `plan` is not
/// `unavailable` and which is in `allowed`, unless `allowed` is empty.
#[must_use]
pub fn select_metro<'a>(
    report: &'a CapacityReport,
    plan: &str,
    allowed: &[String],
) -> Option<&'a str> {
    report.iter().find_map(|(metro, plans)| {
        let level = plans.get(plan)?;
        if !level.is_available() {
            debug!(metro = %metro, plan, "No capacity");
            return None;
        }
        if !allowed.is_empty() && !allowed.iter().any(|m| m == metro) {
            debug!(metro = %metro, plan, level = %level, "Metro not allowed");
            return None;
        }
        Some(metro.as_str())
    })
}

/// Resolves a metro with capacity for a plan.
pub struct CapacityLocator<'a, P: ?Sized> {
    provider: &'a P,
    allowed: &'a [String],
}

impl<'a, P: CapacityService + ?Sized> CapacityLocator<'a, P> {
    /// Locator restricted to `allowed` metros (empty means any).
    #[must_use]
    pub fn new(provider: &'a P, allowed: &'a [String]) -> Self {
        Self { provider, allowed }
    }

    /// Find a metro where `plan` can be deployed.
    ///
    /// # Errors
    /// Returns [`ProviderError::NoCapacity`] if no allowed metro has capacity,
    /// or the transport error from fetching the capacity report.
    pub async fn check_availability_for(&self, plan: &str) -> Result<String, ProviderError> {
        let report = self.provider.list_metro_capacity().await?;

        let metro = select_metro(&report, plan, self.allowed).ok_or_else(|| {
            ProviderError::NoCapacity {
                plan: plan.to_string(),
                metros: self.allowed.to_vec(),
            }
        })?;

        info!(plan, metro, "Found capacity");
        Ok(metro.to_string())
    }
}
