//! Equinix Metal API request and response models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::providers::traits::CapacityLevel;

// ============================================================================
// Capacity
// ============================================================================

/// `GET /capacity/metros` response.
#[derive(Debug, Deserialize)]
pub struct CapacityResponse {
    /// Metro code → plan slug → capacity entry.
    pub capacity: BTreeMap<String, BTreeMap<String, CapacityEntry>>,
}

/// Capacity of one plan in one metro.
#[derive(Debug, Deserialize)]
pub struct CapacityEntry {
    /// Availability level.
    pub level: CapacityLevel,
}

// ============================================================================
// Devices
// ============================================================================

/// Paginated device list.
#[derive(Debug, Deserialize)]
pub struct DeviceList {
    /// Devices on this page.
    pub devices: Vec<DeviceResource>,
    /// Pagination info.
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

/// Pagination metadata.
#[derive(Debug, Deserialize)]
pub struct PageMeta {
    /// Last page number.
    pub last_page: Option<u32>,
}

/// Device resource from API.
#[derive(Debug, Deserialize)]
pub struct DeviceResource {
    /// Device ID.
    pub id: String,
    /// Hostname.
    #[serde(default)]
    pub hostname: String,
    /// Raw device state (`queued`, `provisioning`, `active`, ...).
    #[serde(default)]
    pub state: String,
    /// Assigned IP addresses.
    #[serde(default)]
    pub ip_addresses: Vec<IpAddress>,
    /// Plan reference.
    pub plan: Option<SlugRef>,
    /// Metro reference.
    pub metro: Option<MetroRef>,
    /// Creation timestamp.
    pub created_at: Option<String>,
}

/// IP address assignment.
#[derive(Debug, Deserialize)]
pub struct IpAddress {
    /// Address.
    pub address: String,
    /// 4 or 6.
    pub address_family: u8,
    /// Whether the address is public.
    #[serde(default)]
    pub public: bool,
}

/// Object with a slug.
#[derive(Debug, Deserialize)]
pub struct SlugRef {
    /// Slug.
    pub slug: Option<String>,
}

/// Metro reference.
#[derive(Debug, Deserialize)]
pub struct MetroRef {
    /// Metro code (e.g., "dc").
    pub code: Option<String>,
}

/// Body of `POST /projects/{id}/devices`.
#[derive(Debug, Serialize)]
pub struct CreateDeviceBody {
    /// Hostname.
    pub hostname: String,
    /// Metro code.
    pub metro: String,
    /// Plan slug.
    pub plan: String,
    /// Operating system slug.
    pub operating_system: String,
    /// Billing cycle.
    pub billing_cycle: String,
}

// ============================================================================
// Events
// ============================================================================

/// `GET /projects/{id}/events` response.
#[derive(Debug, Deserialize)]
pub struct EventList {
    /// Events on this page, most recent first.
    pub events: Vec<EventResource>,
}

/// Event resource from API.
#[derive(Debug, Deserialize)]
pub struct EventResource {
    /// Event type (e.g., "instance.created").
    #[serde(rename = "type", default)]
    pub event_type: String,
    /// Interpolated text naming the affected resource.
    #[serde(default)]
    pub interpolated: String,
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub created_at: String,
}

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
pub struct ApiError {
    /// Error messages.
    #[serde(default)]
    pub errors: Vec<String>,
}
