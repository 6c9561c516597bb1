//! Ephemeral bare metal provisioning and usage auditing for Equinix Metal.
//!
//! Two halves share the provider traits:
//!
//! - **Provisioning**: find a metro with capacity for a plan, create (or
//!   reuse) a device, wait until it is active, and delete it again.
//! - **Auditing**: scan the project's event log for the last few days, pair
//!   the creation and deletion events of each device, and report uptime,
//!   cost and devices that were left running too long.
//!
//! # Example
//!
//! ```rust,ignore
//! use metal_audit::config::{CostModel, ProvisioningConfig, ReconcileOptions};
//! use metal_audit::providers::equinix::Equinix;
//! use metal_audit::{EventReconciler, ProvisioningController, UsageReport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = Equinix::new("token", "project-id")?;
//!
//!     let options = ReconcileOptions::default();
//!     let scan = EventReconciler::new(&provider, &options).reconcile().await?;
//!     println!("{}", UsageReport::from_reconciliation(&scan, CostModel::default()).render());
//!
//!     let controller = ProvisioningController::new(provider, ProvisioningConfig::default());
//!     let device = controller.setup("ipi").await?;
//!     controller.teardown(&device.hostname).await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod analytics;
pub mod capacity;
pub mod config;
pub mod events;
pub mod hosts;
pub mod naming;
pub mod providers;
pub mod provisioning;

pub use analytics::{AverageUptime, UsageReport};
pub use capacity::CapacityLocator;
pub use events::{EventReconciler, LifecycleRecord, Reconciliation};
pub use hosts::Host;
pub use providers::{Device, DeviceState, ProviderError};
pub use provisioning::ProvisioningController;
