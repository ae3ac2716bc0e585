//! Device Events
//!
//! Notifications describing changes to devices, ports and the
//! locally applied mastership role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::{Device, Port};
use crate::mastership::MastershipRole;

/// Kind of device event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEventType {
    DeviceAdded,
    DeviceUpdated,
    DeviceRemoved,
    DeviceAvailabilityChanged,
    DeviceMastershipChanged,
    PortAdded,
    PortUpdated,
    PortRemoved,
    PortStatsUpdated,
}

impl std::fmt::Display for DeviceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEventType::DeviceAdded => write!(f, "DEVICE_ADDED"),
            DeviceEventType::DeviceUpdated => write!(f, "DEVICE_UPDATED"),
            DeviceEventType::DeviceRemoved => write!(f, "DEVICE_REMOVED"),
            DeviceEventType::DeviceAvailabilityChanged => write!(f, "DEVICE_AVAILABILITY_CHANGED"),
            DeviceEventType::DeviceMastershipChanged => write!(f, "DEVICE_MASTERSHIP_CHANGED"),
            DeviceEventType::PortAdded => write!(f, "PORT_ADDED"),
            DeviceEventType::PortUpdated => write!(f, "PORT_UPDATED"),
            DeviceEventType::PortRemoved => write!(f, "PORT_REMOVED"),
            DeviceEventType::PortStatsUpdated => write!(f, "PORT_STATS_UPDATED"),
        }
    }
}

/// A device event, carrying a snapshot of its subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub id: Uuid,
    pub event_type: DeviceEventType,
    pub device: Device,
    pub port: Option<Port>,
    /// Locally applied role, for mastership events
    pub role: Option<MastershipRole>,
    pub time: DateTime<Utc>,
}

impl DeviceEvent {
    /// Create a device-level event
    pub fn new(event_type: DeviceEventType, device: Device) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            device,
            port: None,
            role: None,
            time: Utc::now(),
        }
    }

    /// Create a port-level event
    pub fn for_port(event_type: DeviceEventType, device: Device, port: Port) -> Self {
        Self {
            port: Some(port),
            ..Self::new(event_type, device)
        }
    }

    /// Create a mastership change event
    pub fn mastership_changed(device: Device, role: MastershipRole) -> Self {
        Self {
            role: Some(role),
            ..Self::new(DeviceEventType::DeviceMastershipChanged, device)
        }
    }

    /// True for an availability event reporting the device went offline
    pub fn is_offline(&self) -> bool {
        self.event_type == DeviceEventType::DeviceAvailabilityChanged && !self.device.available
    }
}
