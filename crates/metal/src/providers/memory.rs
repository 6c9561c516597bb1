//! In-memory provider.
//!
//! Keeps capacity, devices and events in process memory. Used for dry runs
//! and as a substitute for the real API in tests. Newly created devices stay
//! in `creating` until they have been polled a configurable number of times.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::providers::traits::{
    CapacityReport, CapacityService, CreateDeviceRequest, Device, DeviceService, DeviceState,
    Event, EventPage, EventService, ProviderError,
};

#[derive(Debug, Default)]
struct State {
    capacity: CapacityReport,
    devices: BTreeMap<String, Device>,
    polls: BTreeMap<String, u32>,
    events: Vec<Event>,
    next_id: u64,
    polls_until_active: u32,
    fail_gets: Option<String>,
    fail_event_page: Option<u32>,
    calls: CallCounts,
}

/// Number of calls each service method has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `list_metro_capacity` calls.
    pub capacity: u32,
    /// `list_devices` calls.
    pub list: u32,
    /// `create_device` calls.
    pub create: u32,
    /// `get_device` calls.
    pub get: u32,
    /// `delete_device` calls.
    pub delete: u32,
    /// `list_events` calls.
    pub event_pages: u32,
}

/// In-memory provider.
#[derive(Debug, Default)]
pub struct InMemory {
    state: Mutex<State>,
}

impl InMemory {
    /// Create an empty provider whose devices become active on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the maps consistent.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Replace the capacity snapshot.
    #[must_use]
    pub fn with_capacity(self, capacity: CapacityReport) -> Self {
        self.state().capacity = capacity;
        self
    }

    /// Number of polls a created device answers with `creating` before it
    /// turns `active`. `u32::MAX` keeps it creating forever.
    #[must_use]
    pub fn with_polls_until_active(self, polls: u32) -> Self {
        self.state().polls_until_active = polls;
        self
    }

    /// Set the event log. Events must be ordered most recent first.
    #[must_use]
    pub fn with_events(self, events: Vec<Event>) -> Self {
        self.state().events = events;
        self
    }

    /// Add an existing device.
    pub fn insert_device(&self, device: Device) {
        self.state().devices.insert(device.id.clone(), device);
    }

    /// Make every subsequent `get_device` fail with an API error.
    pub fn fail_gets(&self, message: impl Into<String>) {
        self.state().fail_gets = Some(message.into());
    }

    /// Make `list_events` fail with an API error when `page` is requested.
    pub fn fail_event_page(&self, page: u32) {
        self.state().fail_event_page = Some(page);
    }

    /// Devices currently known, ordered by ID.
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.state().devices.values().cloned().collect()
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }
}

#[async_trait]
impl CapacityService for InMemory {
    async fn list_metro_capacity(&self) -> Result<CapacityReport, ProviderError> {
        let mut state = self.state();
        state.calls.capacity += 1;
        Ok(state.capacity.clone())
    }
}

#[async_trait]
impl DeviceService for InMemory {
    async fn list_devices(&self) -> Result<Vec<Device>, ProviderError> {
        let mut state = self.state();
        state.calls.list += 1;
        Ok(state.devices.values().cloned().collect())
    }

    async fn create_device(&self, req: CreateDeviceRequest) -> Result<Device, ProviderError> {
        let mut state = self.state();
        state.calls.create += 1;
        state.next_id += 1;

        let device = Device {
            id: format!("dev-{}", state.next_id),
            hostname: req.hostname,
            state: DeviceState::Creating,
            ipv4: None,
            plan: req.plan,
            metro: req.metro,
            created_at: Some(Utc::now()),
        };
        debug!(device_id = %device.id, hostname = %device.hostname, "Stored device");
        state.devices.insert(device.id.clone(), device.clone());
        Ok(device)
    }

    async fn get_device(&self, id: &str) -> Result<Device, ProviderError> {
        let mut state = self.state();
        state.calls.get += 1;

        if let Some(message) = state.fail_gets.clone() {
            return Err(ProviderError::Api {
                status: 503,
                message,
            });
        }

        let threshold = state.polls_until_active;
        let polls = {
            let counter = state.polls.entry(id.to_string()).or_insert(0);
            *counter = counter.saturating_add(1);
            *counter
        };

        let device = state
            .devices
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("device {id}")))?;

        if device.state == DeviceState::Creating && polls > threshold {
            device.state = DeviceState::Active;
            device.ipv4 = Some(format!("198.51.100.{}", polls % 250 + 1));
        }
        Ok(device.clone())
    }

    async fn delete_device(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.delete += 1;
        state.devices.remove(id);
        state.polls.remove(id);
        Ok(())
    }
}

#[async_trait]
impl EventService for InMemory {
    async fn list_events(&self, page: u32, page_size: u32) -> Result<EventPage, ProviderError> {
        let mut state = self.state();
        state.calls.event_pages += 1;

        if state.fail_event_page == Some(page) {
            return Err(ProviderError::Api {
                status: 502,
                message: format!("event page {page} unavailable"),
            });
        }

        let size = page_size.max(1) as usize;
        let start = (page.saturating_sub(1) as usize).saturating_mul(size);
        let events: Vec<Event> = state.events.iter().skip(start).take(size).cloned().collect();
        Ok(events.into())
    }
}
