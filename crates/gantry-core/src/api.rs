use crate::error::Result;
use crate::types::PowerState;
use serde::{Deserialize, Serialize};

// ── API response types ─────────────────────────────────────────────────────

/// GET /api/client/servers/{id}/websocket response
#[derive(Deserialize)]
pub struct WebsocketCredentialsResponse {
    pub data: WebsocketCredentials,
}

/// Short-lived socket token plus the daemon socket URL it is valid for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebsocketCredentials {
    pub token: String,
    pub socket: String,
}

/// GET /api/client/servers/{id}/resources response
#[derive(Deserialize)]
pub struct ResourceUsageResponse {
    pub attributes: ResourceUsageAttributes,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResourceUsageAttributes {
    pub current_state: String,
    #[serde(default)]
    pub is_suspended: bool,
    pub resources: ApiResources,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ApiResources {
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub cpu_absolute: f64,
    #[serde(default)]
    pub disk_bytes: u64,
    #[serde(default)]
    pub network_rx_bytes: u64,
    #[serde(default)]
    pub network_tx_bytes: u64,
    #[serde(default)]
    pub uptime: u64,
}

// ── View models ────────────────────────────────────────────────────────────

/// Resource usage for one dashboard row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    /// `None` while the daemon reports no known state (e.g. installing)
    pub status: Option<PowerState>,
    pub is_suspended: bool,
    pub memory_usage_bytes: u64,
    pub cpu_usage_percent: f64,
    pub disk_usage_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub uptime_secs: u64,
}

impl From<ResourceUsageAttributes> for ServerStats {
    fn from(attrs: ResourceUsageAttributes) -> Self {
        Self {
            status: PowerState::from_wire(&attrs.current_state),
            is_suspended: attrs.is_suspended,
            memory_usage_bytes: attrs.resources.memory_bytes,
            cpu_usage_percent: attrs.resources.cpu_absolute,
            disk_usage_bytes: attrs.resources.disk_bytes,
            network_rx_bytes: attrs.resources.network_rx_bytes,
            network_tx_bytes: attrs.resources.network_tx_bytes,
            uptime_secs: attrs.resources.uptime,
        }
    }
}

/// Parse a resource usage body into the row view model.
pub fn parse_resource_usage(body: &str) -> Result<ServerStats> {
    let resp: ResourceUsageResponse = serde_json::from_str(body)?;
    Ok(resp.attributes.into())
}

/// Parse a websocket credentials body.
pub fn parse_websocket_credentials(body: &str) -> Result<WebsocketCredentials> {
    let resp: WebsocketCredentialsResponse = serde_json::from_str(body)?;
    Ok(resp.data)
}
