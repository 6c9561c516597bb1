//! Equinix Metal API client implementation.
//!
//! API Documentation: <https://deploy.equinix.com/developers/api/metal/>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use super::models::{
    ApiError, CapacityResponse, CreateDeviceBody, DeviceList, DeviceResource, EventList,
    EventResource,
};
use crate::providers::traits::{
    CapacityReport, CapacityService, CreateDeviceRequest, Device, DeviceService, DeviceState,
    Event, EventKind, EventPage, EventService, MalformedEvent, ProviderError,
};

/// Base URL for the Equinix Metal API.
pub const API_BASE_URL: &str = "https://api.equinix.com/metal/v1/";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Page size used when listing devices.
const DEVICE_PAGE_SIZE: u32 = 100;

/// Equinix Metal provider, scoped to one project.
#[derive(Clone)]
pub struct Equinix {
    /// HTTP client.
    client: Client,
    /// API base URL (always ends with `/`).
    base_url: Url,
    /// API token.
    auth_token: String,
    /// Project ID for device and event operations.
    project_id: String,
}

impl Equinix {
    /// Create a new Equinix Metal provider.
    ///
    /// # Arguments
    /// * `auth_token` - Equinix Metal API token
    /// * `project_id` - Project ID for device and event operations
    ///
    /// # Errors
    /// Returns error if the token is empty or the HTTP client cannot be created.
    pub fn new(
        auth_token: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let auth_token = auth_token.into();
        if auth_token.is_empty() {
            return Err(ProviderError::Config(
                "Equinix Metal auth token is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(concat!("metal-audit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let base_url = Url::parse(API_BASE_URL)
            .map_err(|e| ProviderError::Config(format!("Invalid API URL: {e}")))?;

        Ok(Self {
            client,
            base_url,
            auth_token,
            project_id: project_id.into(),
        })
    }

    /// Point the client at a different API endpoint.
    ///
    /// # Errors
    /// Returns error if the URL cannot be parsed.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ProviderError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        self.base_url = Url::parse(&normalized)
            .map_err(|e| ProviderError::Config(format!("Invalid API URL {base_url}: {e}")))?;
        Ok(self)
    }

    /// Project this client operates on.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ProviderError::Config(format!("Invalid API path {path}: {e}")))
    }

    /// Make an authenticated GET request.
    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = self.url(path)?;
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(url)
            .header("X-Auth-Token", &self.auth_token)
            .query(query)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated POST request.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let url = self.url(path)?;
        debug!(url = %url, "POST request");

        let response = self
            .client
            .post(url)
            .header("X-Auth-Token", &self.auth_token)
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated DELETE request.
    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let url = self.url(path)?;
        debug!(url = %url, "DELETE request");

        let response = self
            .client
            .delete(url)
            .header("X-Auth-Token", &self.auth_token)
            .query(&[("force_delete", "false")])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: Self::error_message(&text),
            })
        }
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                ProviderError::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(ProviderError::NotFound(Self::error_message(&text)))
        } else {
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: Self::error_message(&text),
            })
        }
    }

    /// Prefer the API's `errors` array over the raw body.
    fn error_message(text: &str) -> String {
        match serde_json::from_str::<ApiError>(text) {
            Ok(err) if !err.errors.is_empty() => err.errors.join("; "),
            _ => text.to_string(),
        }
    }

    /// Convert API device resource to our Device type.
    fn to_device(resource: &DeviceResource) -> Device {
        let ipv4 = resource
            .ip_addresses
            .iter()
            .find(|ip| ip.public && ip.address_family == 4)
            .map(|ip| ip.address.clone());

        Device {
            id: resource.id.clone(),
            hostname: resource.hostname.clone(),
            state: DeviceState::from_provider(&resource.state),
            ipv4,
            plan: resource
                .plan
                .as_ref()
                .and_then(|p| p.slug.clone())
                .unwrap_or_default(),
            metro: resource
                .metro
                .as_ref()
                .and_then(|m| m.code.clone())
                .unwrap_or_default(),
            created_at: resource
                .created_at
                .as_ref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
        }
    }

    /// Convert API event resource to our Event type.
    fn to_event(resource: &EventResource) -> Result<Event, MalformedEvent> {
        let created_at = chrono::DateTime::parse_from_rfc3339(&resource.created_at)
            .map_err(|e| MalformedEvent {
                interpolated: resource.interpolated.clone(),
                reason: format!("invalid timestamp {:?}: {e}", resource.created_at),
            })?
            .with_timezone(&chrono::Utc);

        Ok(Event {
            created_at,
            kind: EventKind::from_provider(&resource.event_type),
            interpolated: resource.interpolated.clone(),
        })
    }
}

#[async_trait]
impl CapacityService for Equinix {
    async fn list_metro_capacity(&self) -> Result<CapacityReport, ProviderError> {
        let response: CapacityResponse = self.get("capacity/metros", &[]).await?;

        Ok(response
            .capacity
            .into_iter()
            .map(|(metro, plans)| {
                let levels = plans
                    .into_iter()
                    .map(|(plan, entry)| (plan, entry.level))
                    .collect();
                (metro, levels)
            })
            .collect())
    }
}

#[async_trait]
impl DeviceService for Equinix {
    async fn list_devices(&self) -> Result<Vec<Device>, ProviderError> {
        let path = format!("projects/{}/devices", self.project_id);
        let mut devices = Vec::new();
        let mut page = 1;

        loop {
            let response: DeviceList = self
                .get(
                    &path,
                    &[
                        ("page", page.to_string()),
                        ("per_page", DEVICE_PAGE_SIZE.to_string()),
                    ],
                )
                .await?;

            devices.extend(response.devices.iter().map(Self::to_device));

            let last_page = response
                .meta
                .as_ref()
                .and_then(|m| m.last_page)
                .unwrap_or(page);
            if page >= last_page {
                break;
            }
            page += 1;
        }

        debug!(count = devices.len(), "Listed devices");
        Ok(devices)
    }

    async fn create_device(&self, req: CreateDeviceRequest) -> Result<Device, ProviderError> {
        info!(
            hostname = %req.hostname,
            plan = %req.plan,
            metro = %req.metro,
            os = %req.os,
            "Creating device"
        );

        let body = CreateDeviceBody {
            hostname: req.hostname,
            metro: req.metro,
            plan: req.plan,
            operating_system: req.os,
            billing_cycle: "hourly".to_string(),
        };

        let resource: DeviceResource = self
            .post(&format!("projects/{}/devices", self.project_id), &body)
            .await?;
        let device = Self::to_device(&resource);

        info!(device_id = %device.id, state = %device.state, "Device created");
        Ok(device)
    }

    async fn get_device(&self, id: &str) -> Result<Device, ProviderError> {
        let resource: DeviceResource = self.get(&format!("devices/{id}"), &[]).await?;
        Ok(Self::to_device(&resource))
    }

    async fn delete_device(&self, id: &str) -> Result<(), ProviderError> {
        info!(device_id = %id, "Deleting device");
        self.delete(&format!("devices/{id}")).await
    }
}

#[async_trait]
impl EventService for Equinix {
    async fn list_events(&self, page: u32, page_size: u32) -> Result<EventPage, ProviderError> {
        let response: EventList = self
            .get(
                &format!("projects/{}/events", self.project_id),
                &[
                    ("page", page.to_string()),
                    ("per_page", page_size.to_string()),
                ],
            )
            .await?;

        let mut result = EventPage::default();
        for resource in &response.events {
            match Self::to_event(resource) {
                Ok(event) => result.events.push(event),
                Err(malformed) => {
                    warn!(page, reason = %malformed.reason, "Skipping malformed event");
                    result.malformed.push(malformed);
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::equinix::models::{IpAddress, MetroRef, SlugRef};

    #[test]
    fn test_new_requires_token() {
        assert!(Equinix::new("", "proj").is_err());
        assert!(Equinix::new("token", "proj").is_ok());
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = Equinix::new("token", "proj")
            .unwrap()
            .with_base_url("http://localhost:1234/metal/v1")
            .unwrap();
        assert_eq!(
            client.url("devices/abc").unwrap().as_str(),
            "http://localhost:1234/metal/v1/devices/abc"
        );
    }

    #[test]
    fn test_to_device_picks_public_ipv4() {
        let resource = DeviceResource {
            id: "d-1".into(),
            hostname: "ipi-42".into(),
            state: "provisioning".into(),
            ip_addresses: vec![
                IpAddress {
                    address: "10.0.0.5".into(),
                    address_family: 4,
                    public: false,
                },
                IpAddress {
                    address: "2604:1380::1".into(),
                    address_family: 6,
                    public: true,
                },
                IpAddress {
                    address: "147.75.1.2".into(),
                    address_family: 4,
                    public: true,
                },
            ],
            plan: Some(SlugRef {
                slug: Some("n2.xlarge.x86".into()),
            }),
            metro: Some(MetroRef {
                code: Some("dc".into()),
            }),
            created_at: Some("2024-03-01T10:00:00Z".into()),
        };

        let device = Equinix::to_device(&resource);
        assert_eq!(device.ipv4.as_deref(), Some("147.75.1.2"));
        assert_eq!(device.state, DeviceState::Creating);
        assert_eq!(device.plan, "n2.xlarge.x86");
        assert_eq!(device.metro, "dc");
        assert!(device.created_at.is_some());
    }

    #[test]
    fn test_to_event_rejects_bad_timestamp() {
        let resource = EventResource {
            event_type: "instance.created".into(),
            interpolated: "ci-bot created \"ipi-7\"".into(),
            created_at: "garbage".into(),
        };

        let malformed = Equinix::to_event(&resource).unwrap_err();
        assert_eq!(malformed.interpolated, resource.interpolated);
        assert!(malformed.reason.contains("garbage"));
    }

    #[test]
    fn test_error_message_prefers_errors_array() {
        assert_eq!(
            Equinix::error_message(r#"{"errors":["bad plan","bad metro"]}"#),
            "bad plan; bad metro"
        );
        assert_eq!(Equinix::error_message("oops"), "oops");
    }
}
