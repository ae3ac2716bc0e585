//! Device Model
//!
//! Identifiers and records for southbound devices and their ports,
//! plus the device store and ownership clock that guard them.

pub mod clock;
pub mod event;
pub mod store;

use serde::{Deserialize, Serialize};

pub use clock::{DeviceClock, Timestamp};
pub use event::{DeviceEvent, DeviceEventType};
pub use store::{DeviceStore, InMemoryDeviceStore};

/// Globally unique device identifier in `scheme:path` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device identifier from its URI
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// The full device URI
    pub fn uri(&self) -> &str {
        &self.0
    }

    /// URI scheme, used to pick the southbound provider
    pub fn scheme(&self) -> &str {
        self.0.split_once(':').map(|(scheme, _)| scheme).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a southbound provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId {
    /// Device URI scheme the provider is responsible for
    pub scheme: String,
    /// Provider name, e.g. the driver module
    pub id: String,
}

impl ProviderId {
    pub fn new(scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scheme, self.id)
    }
}

/// Kind of network element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Switch,
    Router,
    Roadm,
    Other,
}

/// Description of a device as reported by its provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub device_type: DeviceType,
    pub manufacturer: String,
    pub hw_version: String,
    pub sw_version: String,
    pub serial_number: String,
    pub chassis_id: String,
}

impl DeviceDescription {
    /// Shorthand for a switch description
    pub fn switch(manufacturer: impl Into<String>, sw_version: impl Into<String>) -> Self {
        Self {
            device_type: DeviceType::Switch,
            manufacturer: manufacturer.into(),
            hw_version: String::new(),
            sw_version: sw_version.into(),
            serial_number: String::new(),
            chassis_id: String::new(),
        }
    }
}

/// A device as recorded in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub provider_id: ProviderId,
    pub description: DeviceDescription,
    /// Whether the device is currently marked online
    pub available: bool,
}

/// Port number on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortNumber(pub u64);

impl std::fmt::Display for PortNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical medium of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortType {
    Copper,
    Fiber,
    Virtual,
}

/// Port state as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescription {
    pub number: PortNumber,
    pub enabled: bool,
    pub port_type: PortType,
    pub speed_mbps: u64,
}

impl PortDescription {
    pub fn new(number: u64, enabled: bool) -> Self {
        Self {
            number: PortNumber(number),
            enabled,
            port_type: PortType::Copper,
            speed_mbps: 1000,
        }
    }
}

/// A port as recorded in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub device_id: DeviceId,
    pub number: PortNumber,
    pub enabled: bool,
    pub port_type: PortType,
    pub speed_mbps: u64,
}

impl Port {
    /// Same port, administratively down
    pub fn disabled_description(&self) -> PortDescription {
        PortDescription {
            number: self.number,
            enabled: false,
            port_type: self.port_type,
            speed_mbps: self.speed_mbps,
        }
    }
}

/// Counters reported for a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatistics {
    pub port: PortNumber,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub duration_secs: u64,
}
