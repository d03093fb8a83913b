use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard response envelope: every payload is wrapped in `{ "data": ... }`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// A `{ "count": n, "data": [...] }` list as embedded in some payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOf<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Default for ListOf<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub networks: ListOf<Network>,
}

/// One mesh network on the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    /// Resource path, e.g. `/2.2/networks/123456`.
    pub url: String,
    pub name: Option<String>,
}

/// A mesh node (access point).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eero {
    pub url: String,
    pub location: Option<String>,
    pub model: Option<String>,
    pub mac_address: Option<String>,
    #[serde(default)]
    pub gateway: bool,
    /// `green`, `red`, ... as reported upstream.
    pub status: Option<String>,
    pub os_version: Option<String>,
    #[serde(default)]
    pub update_available: bool,
}

impl Eero {
    /// Stable node identifier: the last segment of the resource path.
    pub fn node_id(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }
}

/// A client device seen by the network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Device {
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub nickname: Option<String>,
    pub manufacturer: Option<String>,
    pub device_type: Option<String>,
    pub ip: Option<String>,
    #[serde(default)]
    pub connected: bool,
    /// `wireless` or `wired`.
    pub connection_type: Option<String>,
    pub source: Option<DeviceSource>,
    pub connectivity: Option<Connectivity>,
    pub usage: Option<DeviceUsage>,
}

impl Device {
    pub fn is_wireless(&self) -> bool {
        self.connection_type.as_deref().unwrap_or("wireless") == "wireless"
    }
}

/// The node a device is attached to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSource {
    pub url: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Connectivity {
    /// e.g. `-52 dBm`; only the numeric part is stored.
    pub signal: Option<String>,
}

impl Connectivity {
    pub fn signal_dbm(&self) -> Option<i64> {
        let raw = self.signal.as_deref()?;
        raw.split_whitespace().next()?.parse().ok()
    }
}

/// Instantaneous throughput reported for a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceUsage {
    pub down_mbps: Option<f64>,
    pub up_mbps: Option<f64>,
}

/// Network-level details used by the network collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDetails {
    pub name: Option<String>,
    /// WAN status, e.g. `connected` / `disconnected`.
    pub status: Option<String>,
    pub guest_network: Option<GuestNetwork>,
    pub connection: Option<ConnectionInfo>,
    pub speed: Option<Speedtest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestNetwork {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// `automatic`, `bridge`, ...
    pub mode: Option<String>,
}

/// The most recent speed test the mesh ran on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Speedtest {
    pub date: Option<DateTime<Utc>>,
    pub down: Option<SpeedValue>,
    pub up: Option<SpeedValue>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpeedValue {
    pub value: f64,
}

/// DHCP reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub mac: String,
    pub ip: String,
    pub description: Option<String>,
    pub url: Option<String>,
}

/// Port forwarding rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forward {
    pub ip: String,
    pub gateway_port: u16,
    pub client_port: u16,
    pub protocol: String,
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    /// Resource path of the reservation this forward targets, if any.
    pub reservation: Option<String>,
    pub url: Option<String>,
}
