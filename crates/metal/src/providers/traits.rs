//! Collaborator traits and common types for the Metal API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Device (or other resource) not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No metro satisfies the plan and allow-list constraints.
    #[error("No availability found for plan {plan} (metros: {metros:?})")]
    NoCapacity { plan: String, metros: Vec<String> },

    /// The device did not become active before the deadline.
    #[error("Device {hostname} not active after {waited_secs} seconds")]
    Timeout { hostname: String, waited_secs: u64 },

    /// `from` is after `to`.
    #[error("Invalid date range: {from} is after {to}")]
    InvalidDateRange { from: NaiveDate, to: NaiveDate },
}

impl ProviderError {
    /// Whether the error came from talking to the provider (network, auth,
    /// provider-side failure or an undecodable payload).
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Api { .. } | Self::Serialization(_) | Self::Config(_)
        )
    }

    /// Whether the error means a required resource or capacity does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NoCapacity { .. })
    }
}

/// Availability level the provider reports for a plan in a metro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityLevel {
    /// No capacity.
    Unavailable,
    /// Some capacity, may run out.
    Limited,
    /// Plenty of capacity.
    Normal,
    /// A level this client does not know about.
    #[serde(other)]
    Unknown,
}

impl CapacityLevel {
    /// Only an explicit `unavailable` excludes a metro.
    #[must_use]
    pub fn is_available(self) -> bool {
        self != Self::Unavailable
    }
}

impl std::fmt::Display for CapacityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Limited => write!(f, "limited"),
            Self::Normal => write!(f, "normal"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Metro → plan → level. Ordered so iteration is sorted by metro, then plan.
pub type CapacityReport = BTreeMap<String, BTreeMap<String, CapacityLevel>>;

/// Lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// No device exists with the requested name.
    Absent,
    /// Queued, provisioning or otherwise on its way up.
    Creating,
    /// Provisioned and usable.
    Active,
    /// Being deprovisioned.
    Deleting,
    /// Gone.
    Deleted,
}

impl DeviceState {
    /// Map a raw provider state string.
    #[must_use]
    pub fn from_provider(state: &str) -> Self {
        match state {
            "active" => Self::Active,
            "deprovisioning" => Self::Deleting,
            "deleted" => Self::Deleted,
            _ => Self::Creating,
        }
    }

    /// Whether the device no longer exists or is on its way out.
    #[must_use]
    pub fn is_gone(self) -> bool {
        matches!(self, Self::Absent | Self::Deleting | Self::Deleted)
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Creating => write!(f, "creating"),
            Self::Active => write!(f, "active"),
            Self::Deleting => write!(f, "deleting"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Point-in-time snapshot of a provider device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Unique device identifier.
    pub id: String,
    /// Device hostname.
    pub hostname: String,
    /// Current state.
    pub state: DeviceState,
    /// Public IPv4 address, once assigned.
    pub ipv4: Option<String>,
    /// Plan slug (e.g., "n2.xlarge.x86").
    pub plan: String,
    /// Metro code (e.g., "dc").
    pub metro: String,
    /// When the device was created.
    pub created_at: Option<DateTime<Utc>>,
}

/// Request to create a new device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDeviceRequest {
    /// Hostname for the device.
    pub hostname: String,
    /// Plan slug.
    pub plan: String,
    /// Metro code.
    pub metro: String,
    /// Operating system slug (e.g., `rocky_8`).
    pub os: String,
}

/// Kind of a project event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// `instance.created`
    Created,
    /// `instance.deleted`
    Deleted,
    /// Anything else.
    Other,
}

impl EventKind {
    /// Map a raw provider event type.
    #[must_use]
    pub fn from_provider(kind: &str) -> Self {
        match kind {
            "instance.created" => Self::Created,
            "instance.deleted" => Self::Deleted,
            _ => Self::Other,
        }
    }
}

/// A project event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the event happened.
    pub created_at: DateTime<Utc>,
    /// Event kind.
    pub kind: EventKind,
    /// Human-readable text with the device id embedded in double quotes.
    pub interpolated: String,
}

/// An event the provider returned but that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedEvent {
    /// Interpolated text, as received.
    pub interpolated: String,
    /// What could not be decoded.
    pub reason: String,
}

/// One page of the event log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPage {
    /// Decoded events, most recent first.
    pub events: Vec<Event>,
    /// Events on this page that could not be decoded.
    pub malformed: Vec<MalformedEvent>,
}

impl EventPage {
    /// Whether the provider returned nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.malformed.is_empty()
    }

    /// Number of entries the provider returned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len() + self.malformed.len()
    }
}

impl From<Vec<Event>> for EventPage {
    fn from(events: Vec<Event>) -> Self {
        Self {
            events,
            malformed: Vec::new(),
        }
    }
}

/// Capacity service.
#[async_trait]
pub trait CapacityService: Send + Sync {
    /// Fetch the current per-metro capacity snapshot.
    async fn list_metro_capacity(&self) -> Result<CapacityReport, ProviderError>;
}

/// Device service, scoped to one project.
#[async_trait]
pub trait DeviceService: Send + Sync {
    /// List all devices in the project.
    async fn list_devices(&self) -> Result<Vec<Device>, ProviderError>;

    /// Create a new device.
    async fn create_device(&self, req: CreateDeviceRequest) -> Result<Device, ProviderError>;

    /// Get device by ID.
    async fn get_device(&self, id: &str) -> Result<Device, ProviderError>;

    /// Delete a device.
    async fn delete_device(&self, id: &str) -> Result<(), ProviderError>;
}

/// Event service, scoped to one project.
#[async_trait]
pub trait EventService: Send + Sync {
    /// Fetch one page (1-based) of events, most recent first.
    ///
    /// Entries that cannot be decoded are returned in
    /// [`EventPage::malformed`] instead of failing the page.
    async fn list_events(&self, page: u32, page_size: u32) -> Result<EventPage, ProviderError>;
}
