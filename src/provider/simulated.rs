//! Simulated Provider
//!
//! Southbound provider without a wire protocol: reachability and role
//! rejection are set by hand, and every role push and probe is recorded.

use std::collections::HashSet;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::device::{DeviceId, ProviderId};
use crate::error::{Error, Result};
use crate::mastership::MastershipRole;
use crate::provider::DeviceProvider;

/// A southbound call made through the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProviderCall {
    RoleChanged(DeviceId, MastershipRole),
    Probe(DeviceId),
}

/// Provider whose devices live in memory
pub struct SimulatedProvider {
    id: ProviderId,
    /// Devices whose control channel is up
    reachable: RwLock<HashSet<DeviceId>>,
    /// Devices refusing role changes
    rejecting: RwLock<HashSet<DeviceId>>,
    /// Every call, in order
    calls: RwLock<Vec<ProviderCall>>,
}

impl SimulatedProvider {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            reachable: RwLock::new(HashSet::new()),
            rejecting: RwLock::new(HashSet::new()),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Bring the control channel to a device up or down
    pub async fn set_reachable(&self, device: &DeviceId, reachable: bool) {
        let mut devices = self.reachable.write().await;
        if reachable {
            devices.insert(device.clone());
        } else {
            devices.remove(device);
        }
    }

    /// Make a device refuse (or accept again) role changes
    pub async fn set_rejecting(&self, device: &DeviceId, rejecting: bool) {
        let mut devices = self.rejecting.write().await;
        if rejecting {
            devices.insert(device.clone());
        } else {
            devices.remove(device);
        }
    }

    /// All calls so far
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.calls.read().await.clone()
    }

    /// Roles pushed to a device, in order
    pub async fn roles_applied(&self, device: &DeviceId) -> Vec<MastershipRole> {
        let calls = self.calls.read().await;
        calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::RoleChanged(d, role) if d == device => Some(*role),
                _ => None,
            })
            .collect()
    }

    /// Last role pushed to a device
    pub async fn last_role(&self, device: &DeviceId) -> Option<MastershipRole> {
        self.roles_applied(device).await.last().copied()
    }

    /// Number of probes sent to a device
    pub async fn probe_count(&self, device: &DeviceId) -> usize {
        let calls = self.calls.read().await;
        calls
            .iter()
            .filter(|call| matches!(call, ProviderCall::Probe(d) if d == device))
            .count()
    }

    /// Forget recorded calls
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }
}

#[async_trait]
impl DeviceProvider for SimulatedProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn role_changed(&self, device: &DeviceId, role: MastershipRole) -> Result<()> {
        if self.rejecting.read().await.contains(device) {
            return Err(Error::RoleRejected {
                device: device.clone(),
                role,
                reason: "device refused role request".into(),
            });
        }
        self.calls
            .write()
            .await
            .push(ProviderCall::RoleChanged(device.clone(), role));
        Ok(())
    }

    async fn trigger_probe(&self, device: &DeviceId) {
        self.calls.write().await.push(ProviderCall::Probe(device.clone()));
    }

    async fn is_reachable(&self, device: &DeviceId) -> bool {
        self.reachable.read().await.contains(device)
    }
}
