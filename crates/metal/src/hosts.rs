//! Narrow view of a provisioned machine.

use crate::providers::Device;

/// What callers of the provisioning workflow need from a machine.
pub trait Host {
    /// Provider identifier.
    fn id(&self) -> &str;
    /// Hostname.
    fn name(&self) -> &str;
    /// Public IPv4 address, empty until one is assigned.
    fn ipv4(&self) -> &str;
}

impl Host for Device {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.hostname
    }

    fn ipv4(&self) -> &str {
        self.ipv4.as_deref().unwrap_or_default()
    }
}
