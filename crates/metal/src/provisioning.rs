//! Ephemeral device lifecycle: create or reuse, wait for active, tear down.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capacity::CapacityLocator;
use crate::config::ProvisioningConfig;
use crate::naming::HostnameGenerator;
use crate::providers::{
    CapacityService, CreateDeviceRequest, Device, DeviceService, DeviceState, ProviderError,
};

/// Where a device is in the provisioning workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionPhase {
    /// No device with the requested name.
    Absent,
    /// Device exists and is not active yet.
    Creating,
    /// Device is usable.
    Active,
    /// Delete issued.
    TearingDown,
    /// Device is gone.
    Deleted,
}

impl std::fmt::Display for ProvisionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Creating => write!(f, "creating"),
            Self::Active => write!(f, "active"),
            Self::TearingDown => write!(f, "tearing_down"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl From<DeviceState> for ProvisionPhase {
    fn from(state: DeviceState) -> Self {
        match state {
            DeviceState::Absent => Self::Absent,
            DeviceState::Creating => Self::Creating,
            DeviceState::Active => Self::Active,
            DeviceState::Deleting => Self::TearingDown,
            DeviceState::Deleted => Self::Deleted,
        }
    }
}

/// Drives devices of one project through setup and teardown.
pub struct ProvisioningController<P> {
    provider: P,
    config: ProvisioningConfig,
    names: HostnameGenerator,
}

impl<P> ProvisioningController<P>
where
    P: CapacityService + DeviceService,
{
    /// Create a controller with an entropy-seeded hostname generator.
    #[must_use]
    pub fn new(provider: P, config: ProvisioningConfig) -> Self {
        Self::with_names(provider, config, HostnameGenerator::from_entropy())
    }

    /// Create a controller with a specific hostname generator.
    #[must_use]
    pub fn with_names(provider: P, config: ProvisioningConfig, names: HostnameGenerator) -> Self {
        Self {
            provider,
            config,
            names,
        }
    }

    /// The underlying provider.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Find a device by exact hostname.
    ///
    /// # Errors
    /// Returns the transport error from listing devices.
    pub async fn find_by_name(&self, hostname: &str) -> Result<Option<Device>, ProviderError> {
        let devices = self.provider.list_devices().await?;
        Ok(devices.into_iter().find(|d| d.hostname == hostname))
    }

    /// Bring up a device named `{prefix}-{n}` and wait until it is active.
    ///
    /// An existing device with the generated name is reused instead of
    /// creating a new one.
    ///
    /// # Errors
    /// Returns [`ProviderError::NoCapacity`] when no allowed metro can host the
    /// plan, [`ProviderError::Timeout`] when the device is not active in time,
    /// or any transport error from the provider.
    pub async fn setup(&self, prefix: &str) -> Result<Device, ProviderError> {
        let hostname = self.names.next(prefix);
        let start = Instant::now();
        info!(hostname = %hostname, "Setting up device");

        let result = self.setup_named(&hostname).await;

        let minutes = start.elapsed().as_secs_f64() / 60.0;
        match &result {
            Ok(device) => info!(
                hostname = %hostname,
                device_id = %device.id,
                minutes = %format!("{minutes:.2}"),
                "Setup completed"
            ),
            Err(e) => warn!(
                hostname = %hostname,
                minutes = %format!("{minutes:.2}"),
                error = %e,
                "Setup failed"
            ),
        }
        result
    }

    async fn setup_named(&self, hostname: &str) -> Result<Device, ProviderError> {
        self.config.poll.validate()?;

        let device = if let Some(existing) = self.find_by_name(hostname).await? {
            info!(
                hostname,
                device_id = %existing.id,
                state = %existing.state,
                "Reusing existing device"
            );
            existing
        } else {
            log_transition(hostname, ProvisionPhase::Absent, ProvisionPhase::Creating);
            self.create(hostname).await?
        };

        let from = ProvisionPhase::from(device.state);
        let device = self.wait_for_active(&device).await?;
        log_transition(hostname, from, ProvisionPhase::Active);
        Ok(device)
    }

    async fn create(&self, hostname: &str) -> Result<Device, ProviderError> {
        let metro = CapacityLocator::new(&self.provider, &self.config.metros)
            .check_availability_for(&self.config.plan)
            .await?;

        info!(
            hostname,
            plan = %self.config.plan,
            os = %self.config.os,
            metro = %metro,
            "Creating new device"
        );

        self.provider
            .create_device(CreateDeviceRequest {
                hostname: hostname.to_string(),
                plan: self.config.plan.clone(),
                metro,
                os: self.config.os.clone(),
            })
            .await
    }

    /// Poll `device` until it is active.
    ///
    /// Checks once immediately, then once per interval. Never sleeps past the
    /// configured timeout; a transport error ends the loop at once.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] for a zero poll interval,
    /// [`ProviderError::Timeout`], or the transport error from polling.
    pub async fn wait_for_active(&self, device: &Device) -> Result<Device, ProviderError> {
        let poll = self.config.poll;
        poll.validate()?;
        let start = Instant::now();
        let deadline = start + poll.timeout;

        loop {
            let current = self.provider.get_device(&device.id).await?;

            info!(
                hostname = %current.hostname,
                device_id = %current.id,
                state = %current.state,
                elapsed_secs = start.elapsed().as_secs(),
                "Polling device state"
            );

            if current.state == DeviceState::Active {
                return Ok(current);
            }

            if Instant::now() + poll.interval > deadline {
                return Err(ProviderError::Timeout {
                    hostname: device.hostname.clone(),
                    waited_secs: start.elapsed().as_secs(),
                });
            }

            tokio::time::sleep(poll.interval).await;
        }
    }

    /// Delete the device named `hostname`, if there is one.
    ///
    /// Devices already being deprovisioned or deleted are left alone.
    ///
    /// # Errors
    /// Returns the transport error from listing or deleting.
    pub async fn teardown(&self, hostname: &str) -> Result<(), ProviderError> {
        let found = self.find_by_name(hostname).await?;
        let Some(device) = found.filter(|d| !d.state.is_gone()) else {
            info!(hostname, "Device already removed");
            return Ok(());
        };

        log_transition(hostname, device.state.into(), ProvisionPhase::TearingDown);
        info!(hostname = %device.hostname, device_id = %device.id, "Deleting device");
        self.provider.delete_device(&device.id).await?;
        log_transition(hostname, ProvisionPhase::TearingDown, ProvisionPhase::Deleted);
        Ok(())
    }
}

fn log_transition(hostname: &str, from: ProvisionPhase, to: ProvisionPhase) {
    debug!(hostname, from = %from, to = %to, "Provisioning phase");
}
