//! Settings for provisioning and usage analysis.

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::providers::ProviderError;

/// Default plan for ephemeral devices.
pub const DEFAULT_PLAN: &str = "n2.xlarge.x86";

/// Default operating system.
pub const DEFAULT_OS: &str = "rocky_8";

/// Default metro allow-list.
pub const DEFAULT_METROS: &[&str] = &["dc", "ch", "sv"];

/// Hostname prefix of devices created by this tool.
pub const DEFAULT_ID_PREFIX: &str = "ipi";

/// What to create and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Plan slug to request.
    pub plan: String,
    /// Operating system slug.
    pub os: String,
    /// Metros a device may be placed in. Empty means any metro.
    pub metros: Vec<String>,
    /// Readiness polling.
    pub poll: PollConfig,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            plan: DEFAULT_PLAN.to_string(),
            os: DEFAULT_OS.to_string(),
            metros: DEFAULT_METROS.iter().map(ToString::to_string).collect(),
            poll: PollConfig::default(),
        }
    }
}

/// Readiness polling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between two status checks.
    pub interval: Duration,
    /// Total time allowed before giving up.
    pub timeout: Duration,
}

impl PollConfig {
    /// Build from whole seconds.
    #[must_use]
    pub fn from_secs(interval_secs: u64, timeout_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Reject settings the poll loop cannot honor.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] when the interval is zero.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.interval.is_zero() {
            return Err(ProviderError::Config(
                "poll interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    /// Upper bound on status checks: one immediate check plus one per interval.
    #[must_use]
    pub fn max_attempts(&self) -> u64 {
        let interval = self.interval.as_millis().max(1);
        u64::try_from(self.timeout.as_millis() / interval).unwrap_or(u64::MAX) + 1
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from_secs(60, 30 * 60)
    }
}

/// Hourly pricing and the uptime beyond which a device counts as leaked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Price of one started hour.
    pub hourly_rate: f64,
    /// Devices up strictly longer than this many hours are leaks.
    pub leak_hours: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            hourly_rate: 2.0,
            leak_hours: 4.0,
        }
    }
}

/// Which part of the event history to analyze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanWindow {
    /// The last `n` whole days before today. Today itself is excluded.
    LastDays(u32),
    /// Calendar dates `from..=to` (UTC).
    Range { from: NaiveDate, to: NaiveDate },
}

impl ScanWindow {
    /// Validated date range.
    ///
    /// # Errors
    /// Returns [`ProviderError::InvalidDateRange`] when `from` is after `to`.
    pub fn range(from: NaiveDate, to: NaiveDate) -> Result<Self, ProviderError> {
        if from > to {
            return Err(ProviderError::InvalidDateRange { from, to });
        }
        Ok(Self::Range { from, to })
    }
}

impl Default for ScanWindow {
    fn default() -> Self {
        Self::LastDays(8)
    }
}

/// Event reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Window to scan.
    pub window: ScanWindow,
    /// Hard bound on pages fetched.
    pub max_pages: u32,
    /// Events per page.
    pub page_size: u32,
    /// Only devices whose id starts with this prefix are analyzed.
    pub id_prefix: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            window: ScanWindow::default(),
            max_pages: 30,
            page_size: 500,
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
        }
    }
}
