//! Provider abstractions for the Metal API.

pub mod equinix;
pub mod memory;
mod traits;

pub use traits::{
    CapacityLevel, CapacityReport, CapacityService, CreateDeviceRequest, Device, DeviceService,
    DeviceState, Event, EventKind, EventPage, EventService, MalformedEvent, ProviderError,
};
