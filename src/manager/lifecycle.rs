//! Provider callbacks: device connect/disconnect, port updates and
//! role replies reported by a southbound provider.

use std::sync::Arc;

use crate::device::{
    DeviceDescription, DeviceEvent, DeviceId, Port, PortDescription, PortStatistics, ProviderId,
};
use crate::error::{Error, Result};
use crate::manager::DeviceManager;
use crate::mastership::MastershipRole;
use crate::provider::DeviceProvider;

/// Callback service handed to a registered provider
#[derive(Clone)]
pub struct DeviceProviderService {
    manager: Arc<DeviceManager>,
    provider: Arc<dyn DeviceProvider>,
}

impl DeviceProviderService {
    pub(crate) fn new(manager: Arc<DeviceManager>, provider: Arc<dyn DeviceProvider>) -> Self {
        Self { manager, provider }
    }

    /// Identity of the provider this service was issued to
    pub fn provider_id(&self) -> &ProviderId {
        self.provider.id()
    }

    async fn check_validity(&self) -> Result<()> {
        if !self.manager.is_active() {
            return Err(Error::ShuttingDown);
        }
        if !self.manager.providers.is_registered(self.provider.id()).await {
            return Err(Error::ProviderInvalid(self.provider.id().to_string()));
        }
        Ok(())
    }

    /// A device connected to this node.
    ///
    /// Candidacy is requested and the role decided by the term is applied
    /// before the device is written to the store.
    pub async fn device_connected(
        &self,
        device: &DeviceId,
        description: DeviceDescription,
    ) -> Result<()> {
        self.check_validity().await?;
        let manager = &self.manager;

        tracing::info!("Device {} connected", device);

        if let Err(e) = manager.mastership.request_role_for(device).await {
            tracing::warn!("Failed to request role for {}: {}", device, e);
        }
        let term = manager.observe_term(device).await;
        let role = if manager.owns(term.as_ref()) {
            tracing::info!("Role of this node is MASTER for {}", device);
            MastershipRole::Master
        } else {
            tracing::info!("Role of this node is STANDBY for {}", device);
            MastershipRole::Standby
        };

        let epoch = term.as_ref().map(|t| t.epoch);
        let current = epoch
            .map(|epoch| manager.roles.observe_epoch(device, epoch))
            .unwrap_or(true);
        let applied = if current {
            Some(manager.applier.apply_role(device, role).await)
        } else {
            tracing::debug!(device = %device, "Skipping role application, a newer term was already observed");
            None
        };

        let event = manager
            .store
            .create_or_update_device(self.provider.id(), device, description)
            .await;
        if let Some(event) = event {
            tracing::trace!("event: {} {:?}", event.event_type, event.device.id);
            manager.post(event);
        }

        if let Some(result) = applied {
            manager.settle_role(device, role, epoch, result).await;
        }
        Ok(())
    }

    /// A device disconnected from this node.
    ///
    /// Ports are marked down and the device offline. If the store refuses
    /// because our ownership view is stale, the term is re-read and the
    /// offline marking retried once when we do own the device. Mastership
    /// is relinquished on every exit path.
    pub async fn device_disconnected(&self, device: &DeviceId) -> Result<()> {
        self.check_validity().await?;

        tracing::info!("Device {} disconnected from this node", device);

        let guard = RelinquishGuard::new(Arc::clone(&self.manager), device.clone());
        let result = self.mark_disconnected(device).await;
        guard.release().await;

        match result {
            Ok(Some(event)) => {
                tracing::info!("Device {} disconnected from cluster", device);
                self.manager.post(event);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::warn!("Failed to mark {} offline: {}", device, e);
                Err(e)
            }
        }
    }

    async fn mark_disconnected(&self, device: &DeviceId) -> Result<Option<DeviceEvent>> {
        let manager = &self.manager;

        let ports: Vec<PortDescription> = manager
            .store
            .ports(device)
            .await
            .iter()
            .map(Port::disabled_description)
            .collect();
        let port_events = manager
            .store
            .update_ports(self.provider.id(), device, ports)
            .await;
        tracing::trace!("Marked {} port(s) of {} down", port_events.len(), device);

        let err = match manager.store.mark_offline(device).await {
            Ok(event) => return Ok(event),
            Err(e) if e.is_stale() => e,
            Err(e) => return Err(e),
        };
        tracing::warn!("Failed to mark {} offline: {}", device, err);

        // Only the master should mark a device offline, but if this node was
        // the last connection there is nobody else to do it. Ownership may
        // also have moved here without the term reaching the clock yet.
        let role = match manager.mastership.request_role_for(device).await {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!("Failed to request role for {}: {}", device, e);
                MastershipRole::None
            }
        };
        let term = manager.observe_term(device).await;
        if manager.owns(term.as_ref()) {
            tracing::info!("Retry marking {} offline", device);
            manager.store.mark_offline(device).await
        } else {
            tracing::info!("Failed again marking {} offline. {}", device, role);
            Ok(None)
        }
    }

    /// Full port list of a device. Ignored unless this node has been master.
    pub async fn update_ports(&self, device: &DeviceId, ports: Vec<PortDescription>) -> Result<()> {
        self.check_validity().await?;
        let manager = &self.manager;

        if !manager.clock.is_timestamp_available(device).await {
            tracing::trace!("Ignoring {} port updates on standby node. {:?}", device, ports);
            return Ok(());
        }

        for event in manager.store.update_ports(self.provider.id(), device, ports).await {
            manager.post(event);
        }
        Ok(())
    }

    /// Single port change. Ignored unless this node has been master.
    pub async fn port_status_changed(&self, device: &DeviceId, port: PortDescription) -> Result<()> {
        self.check_validity().await?;
        let manager = &self.manager;

        if !manager.clock.is_timestamp_available(device).await {
            tracing::trace!("Ignoring {} port update on standby node. {:?}", device, port);
            return Ok(());
        }

        let number = port.number;
        if let Some(event) = manager
            .store
            .update_port_status(self.provider.id(), device, port)
            .await
        {
            tracing::info!("Device {} port {} status changed", device, number);
            manager.post(event);
        }
        Ok(())
    }

    pub async fn update_port_statistics(
        &self,
        device: &DeviceId,
        statistics: Vec<PortStatistics>,
    ) -> Result<()> {
        self.check_validity().await?;

        if let Some(event) = self
            .manager
            .store
            .update_port_statistics(self.provider.id(), device, statistics)
            .await
        {
            self.manager.post(event);
        }
        Ok(())
    }

    /// The device answered a role request.
    ///
    /// An empty reply means the channel is unhealthy, and a device that
    /// insists on MASTER when asked for something else may be controlled
    /// by us alone; both cases relinquish. A device that complied with a
    /// role the election layer no longer agrees with is only logged.
    pub async fn received_role_reply(
        &self,
        device: &DeviceId,
        requested: Option<MastershipRole>,
        response: Option<MastershipRole>,
    ) -> Result<()> {
        self.check_validity().await?;
        let manager = &self.manager;

        tracing::info!(
            "Got reply to a role request for {}: asked for {:?}, and got {:?}",
            device,
            requested,
            response
        );

        match (requested, response) {
            (None, None) => {
                tracing::warn!("Failed to assert role onto device {}, channel looks unhealthy", device);
                manager.relinquish(device).await;
            }
            (Some(requested), Some(response)) if requested == response => {
                let local = manager.mastership.local_role(device).await;
                if requested != local {
                    // Left unresolved: the device complied, the election layer disagrees
                    tracing::warn!(
                        device = %device,
                        "Device accepted {} but local role is {}",
                        requested,
                        local
                    );
                }
            }
            (_, response) => {
                tracing::warn!("Failed to assert role [{:?}] onto device {}", requested, device);
                if response == Some(MastershipRole::Master) {
                    manager.relinquish(device).await;
                }
            }
        }
        Ok(())
    }
}

/// Relinquishes a device when disconnect handling ends, however it ends.
///
/// [`RelinquishGuard::release`] does it inline; if the guard is dropped
/// without being released (panic or cancelled future), the relinquish is
/// spawned on the runtime instead.
struct RelinquishGuard {
    manager: Option<Arc<DeviceManager>>,
    device: DeviceId,
}

impl RelinquishGuard {
    fn new(manager: Arc<DeviceManager>, device: DeviceId) -> Self {
        Self {
            manager: Some(manager),
            device,
        }
    }

    async fn release(mut self) {
        if let Some(manager) = self.manager.clone() {
            manager.release_device(&self.device).await;
        }
        self.manager = None;
    }
}

impl Drop for RelinquishGuard {
    fn drop(&mut self) {
        let manager = match self.manager.take() {
            Some(manager) => manager,
            None => return,
        };
        let device = self.device.clone();

        tracing::warn!("Disconnect handling for {} did not complete, relinquishing", device);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    manager.release_device(&device).await;
                });
            }
            Err(_) => tracing::error!("No runtime left to relinquish {}", device),
        }
    }
}

impl DeviceManager {
    /// Relinquish a device this node no longer reaches and forget its role
    async fn release_device(&self, device: &DeviceId) {
        self.relinquish(device).await;
        self.roles.forget(device);
    }
}
