//! Device Store
//!
//! Contract for the device/topology store consumed by the device
//! manager, and an in-memory replica used by tests and the simulator.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::device::{
    Device, DeviceClock, DeviceDescription, DeviceEvent, DeviceEventType, DeviceId, Port,
    PortDescription, PortNumber, PortStatistics, ProviderId,
};
use crate::error::{Error, Result};

/// Store of device and port state
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Create or update a device, marking it online
    async fn create_or_update_device(
        &self,
        provider: &ProviderId,
        device: &DeviceId,
        description: DeviceDescription,
    ) -> Option<DeviceEvent>;

    /// Mark a device offline.
    ///
    /// Fails with [`Error::StaleMastership`] when this node is not allowed
    /// to write authoritative state for the device.
    async fn mark_offline(&self, device: &DeviceId) -> Result<Option<DeviceEvent>>;

    /// Replace the full port list of a device
    async fn update_ports(
        &self,
        provider: &ProviderId,
        device: &DeviceId,
        ports: Vec<PortDescription>,
    ) -> Vec<DeviceEvent>;

    /// Update a single port
    async fn update_port_status(
        &self,
        provider: &ProviderId,
        device: &DeviceId,
        port: PortDescription,
    ) -> Option<DeviceEvent>;

    /// Record port counters
    async fn update_port_statistics(
        &self,
        provider: &ProviderId,
        device: &DeviceId,
        statistics: Vec<PortStatistics>,
    ) -> Option<DeviceEvent>;

    /// Administratively remove a device
    async fn remove_device(&self, device: &DeviceId) -> Option<DeviceEvent>;

    async fn device_count(&self) -> usize;

    async fn devices(&self) -> Vec<Device>;

    async fn available_devices(&self) -> Vec<Device>;

    async fn device(&self, device: &DeviceId) -> Option<Device>;

    async fn is_available(&self, device: &DeviceId) -> bool;

    async fn ports(&self, device: &DeviceId) -> Vec<Port>;

    async fn port(&self, device: &DeviceId, number: PortNumber) -> Option<Port>;

    async fn port_statistics(&self, device: &DeviceId) -> Vec<PortStatistics>;
}

struct DeviceRecord {
    device: Device,
    ports: BTreeMap<PortNumber, Port>,
    statistics: BTreeMap<PortNumber, PortStatistics>,
}

impl DeviceRecord {
    fn port_from(&self, desc: &PortDescription) -> Port {
        Port {
            device_id: self.device.id.clone(),
            number: desc.number,
            enabled: desc.enabled,
            port_type: desc.port_type,
            speed_mbps: desc.speed_mbps,
        }
    }

    /// Apply one port description, returning the event it caused
    fn apply_port(&mut self, desc: &PortDescription) -> Option<DeviceEvent> {
        let port = self.port_from(desc);
        let event_type = match self.ports.get(&desc.number) {
            None => DeviceEventType::PortAdded,
            Some(existing) if *existing != port => DeviceEventType::PortUpdated,
            Some(_) => return None,
        };
        self.ports.insert(desc.number, port.clone());
        Some(DeviceEvent::for_port(event_type, self.device.clone(), port))
    }
}

/// In-memory device store replica for a single node
pub struct InMemoryDeviceStore {
    /// All known devices
    devices: RwLock<HashMap<DeviceId, DeviceRecord>>,
    /// Ownership clock gating authoritative writes
    clock: Arc<DeviceClock>,
}

impl InMemoryDeviceStore {
    /// Create an empty store
    pub fn new(clock: Arc<DeviceClock>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn create_or_update_device(
        &self,
        provider: &ProviderId,
        device: &DeviceId,
        description: DeviceDescription,
    ) -> Option<DeviceEvent> {
        let mut devices = self.devices.write().await;
        match devices.get_mut(device) {
            None => {
                let record = DeviceRecord {
                    device: Device {
                        id: device.clone(),
                        provider_id: provider.clone(),
                        description,
                        available: true,
                    },
                    ports: BTreeMap::new(),
                    statistics: BTreeMap::new(),
                };
                let event = DeviceEvent::new(DeviceEventType::DeviceAdded, record.device.clone());
                devices.insert(device.clone(), record);
                Some(event)
            }
            Some(record) => {
                let changed = record.device.description != description
                    || record.device.provider_id != *provider;
                let was_available = record.device.available;

                record.device.description = description;
                record.device.provider_id = provider.clone();
                record.device.available = true;

                if changed {
                    Some(DeviceEvent::new(DeviceEventType::DeviceUpdated, record.device.clone()))
                } else if !was_available {
                    Some(DeviceEvent::new(
                        DeviceEventType::DeviceAvailabilityChanged,
                        record.device.clone(),
                    ))
                } else {
                    None
                }
            }
        }
    }

    async fn mark_offline(&self, device: &DeviceId) -> Result<Option<DeviceEvent>> {
        let mut devices = self.devices.write().await;
        let record = match devices.get_mut(device) {
            Some(record) => record,
            None => return Ok(None),
        };

        if self.clock.next_timestamp(device).await.is_none() {
            return Err(Error::StaleMastership(device.clone()));
        }

        if !record.device.available {
            return Ok(None);
        }

        record.device.available = false;
        Ok(Some(DeviceEvent::new(
            DeviceEventType::DeviceAvailabilityChanged,
            record.device.clone(),
        )))
    }

    async fn update_ports(
        &self,
        _provider: &ProviderId,
        device: &DeviceId,
        ports: Vec<PortDescription>,
    ) -> Vec<DeviceEvent> {
        let mut devices = self.devices.write().await;
        let record = match devices.get_mut(device) {
            Some(record) => record,
            None => return Vec::new(),
        };

        let mut events: Vec<DeviceEvent> =
            ports.iter().filter_map(|desc| record.apply_port(desc)).collect();

        let stale: Vec<PortNumber> = record
            .ports
            .keys()
            .filter(|number| !ports.iter().any(|desc| desc.number == **number))
            .copied()
            .collect();
        for number in stale {
            if let Some(port) = record.ports.remove(&number) {
                record.statistics.remove(&number);
                events.push(DeviceEvent::for_port(
                    DeviceEventType::PortRemoved,
                    record.device.clone(),
                    port,
                ));
            }
        }

        events
    }

    async fn update_port_status(
        &self,
        _provider: &ProviderId,
        device: &DeviceId,
        port: PortDescription,
    ) -> Option<DeviceEvent> {
        let mut devices = self.devices.write().await;
        devices.get_mut(device)?.apply_port(&port)
    }

    async fn update_port_statistics(
        &self,
        _provider: &ProviderId,
        device: &DeviceId,
        statistics: Vec<PortStatistics>,
    ) -> Option<DeviceEvent> {
        let mut devices = self.devices.write().await;
        let record = devices.get_mut(device)?;
        for stats in statistics {
            record.statistics.insert(stats.port, stats);
        }
        Some(DeviceEvent::new(DeviceEventType::PortStatsUpdated, record.device.clone()))
    }

    async fn remove_device(&self, device: &DeviceId) -> Option<DeviceEvent> {
        let mut devices = self.devices.write().await;
        devices
            .remove(device)
            .map(|record| DeviceEvent::new(DeviceEventType::DeviceRemoved, record.device))
    }

    async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    async fn devices(&self) -> Vec<Device> {
        let devices = self.devices.read().await;
        devices.values().map(|record| record.device.clone()).collect()
    }

    async fn available_devices(&self) -> Vec<Device> {
        let devices = self.devices.read().await;
        devices
            .values()
            .filter(|record| record.device.available)
            .map(|record| record.device.clone())
            .collect()
    }

    async fn device(&self, device: &DeviceId) -> Option<Device> {
        let devices = self.devices.read().await;
        devices.get(device).map(|record| record.device.clone())
    }

    async fn is_available(&self, device: &DeviceId) -> bool {
        let devices = self.devices.read().await;
        devices.get(device).map(|record| record.device.available).unwrap_or(false)
    }

    async fn ports(&self, device: &DeviceId) -> Vec<Port> {
        let devices = self.devices.read().await;
        devices
            .get(device)
            .map(|record| record.ports.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn port(&self, device: &DeviceId, number: PortNumber) -> Option<Port> {
        let devices = self.devices.read().await;
        devices.get(device)?.ports.get(&number).cloned()
    }

    async fn port_statistics(&self, device: &DeviceId) -> Vec<PortStatistics> {
        let devices = self.devices.read().await;
        devices
            .get(device)
            .map(|record| record.statistics.values().cloned().collect())
            .unwrap_or_default()
    }
}
