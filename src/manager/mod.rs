//! Device Manager
//!
//! Keeps the local mastership role of every device consistent with the
//! cluster. Three independent triggers feed it:
//!
//! - southbound connect/disconnect and role replies, through the
//!   [`DeviceProviderService`] handed to each registered provider
//! - election changes published by the [`MastershipService`]
//! - a periodic audit of every known device
//!
//! None of them serialize against each other. Every decision re-reads the
//! authoritative term before acting, and a failed or unconfirmed role
//! assertion is answered by relinquishing the device.

mod applier;
mod audit;
mod lifecycle;
mod listener;
mod reconcile;
mod roles;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use futures::FutureExt;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::{MastershipConfig, WolfMasterConfig};
use crate::device::{
    Device, DeviceClock, DeviceEvent, DeviceId, DeviceStore, InMemoryDeviceStore, Port,
    PortNumber, PortStatistics, ProviderId,
};
use crate::error::Result;
use crate::event::{EventDispatcher, EventSink};
use crate::mastership::{MastershipRole, MastershipService, MastershipTermService, NodeId};
use crate::provider::{DeviceProvider, ProviderRegistry};

pub use applier::RoleApplier;
pub use lifecycle::DeviceProviderService;
pub use roles::{RoleEntry, RoleTable};

/// Mastership reconciliation engine and device service for one node
pub struct DeviceManager {
    /// This node's ID
    local_node: NodeId,
    /// Reconciliation settings
    config: MastershipConfig,
    /// Device and port state
    store: Arc<dyn DeviceStore>,
    /// Per-device election
    mastership: Arc<dyn MastershipService>,
    /// Authoritative terms
    terms: Arc<dyn MastershipTermService>,
    /// Ownership timestamps handed to the store
    clock: Arc<DeviceClock>,
    /// Southbound providers
    providers: Arc<ProviderRegistry>,
    /// Southbound role application
    applier: RoleApplier,
    /// Locally applied roles
    roles: RoleTable,
    /// Device event delivery
    events: Arc<dyn EventSink>,
    /// Running flag
    active: AtomicBool,
    /// Shutdown signal for background tasks
    shutdown: watch::Sender<bool>,
    /// Background task handles
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceManager {
    /// Create a device manager around its collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_node: NodeId,
        config: MastershipConfig,
        events: Arc<dyn EventSink>,
        store: Arc<dyn DeviceStore>,
        mastership: Arc<dyn MastershipService>,
        terms: Arc<dyn MastershipTermService>,
        clock: Arc<DeviceClock>,
        providers: Arc<ProviderRegistry>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            local_node,
            config,
            store,
            mastership,
            terms,
            clock,
            applier: RoleApplier::new(Arc::clone(&providers)),
            providers,
            roles: RoleTable::new(),
            events,
            active: AtomicBool::new(false),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Create a device manager backed by an in-memory store, using the
    /// given service for both election and terms
    pub fn in_memory<M>(config: &WolfMasterConfig, mastership: M) -> Arc<Self>
    where
        M: MastershipService + MastershipTermService + 'static,
    {
        let local_node = config.node_id();
        let clock = Arc::new(DeviceClock::new(local_node.clone()));
        let store = Arc::new(InMemoryDeviceStore::new(Arc::clone(&clock)));
        let mastership = Arc::new(mastership);
        Self::new(
            local_node,
            config.mastership.clone(),
            Arc::new(EventDispatcher::new(config.events.buffer_size)),
            store,
            mastership.clone(),
            mastership,
            clock,
            Arc::new(ProviderRegistry::new()),
        )
    }

    /// Start listening for election changes and schedule the audit
    pub async fn activate(self: &Arc<Self>) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(false);

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_mastership_listener());
        tasks.push(self.spawn_audit());

        tracing::info!(node = %self.local_node, "Device manager started");
    }

    /// Stop the audit and the election listener, then refuse further
    /// provider callbacks
    pub async fn deactivate(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }

        tracing::info!(node = %self.local_node, "Device manager stopped");
    }

    /// Whether the manager is running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// This node's ID
    pub fn local_node(&self) -> &NodeId {
        &self.local_node
    }

    /// Register a southbound provider and hand it its callback service
    pub async fn register_provider(
        self: &Arc<Self>,
        provider: Arc<dyn DeviceProvider>,
    ) -> Result<DeviceProviderService> {
        self.providers.register(Arc::clone(&provider)).await?;
        Ok(DeviceProviderService::new(Arc::clone(self), provider))
    }

    /// Unregister a provider; its service stops accepting callbacks
    pub async fn unregister_provider(&self, id: &ProviderId) -> bool {
        self.providers.unregister(id).await.is_some()
    }

    /// Register a device event listener
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub async fn device_count(&self) -> usize {
        self.store.device_count().await
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.store.devices().await
    }

    pub async fn available_devices(&self) -> Vec<Device> {
        self.store.available_devices().await
    }

    pub async fn device(&self, device: &DeviceId) -> Option<Device> {
        self.store.device(device).await
    }

    /// Role the election layer currently gives this node for the device
    pub async fn role(&self, device: &DeviceId) -> MastershipRole {
        self.mastership.local_role(device).await
    }

    /// Role this node last applied to the device southbound
    pub fn applied_role(&self, device: &DeviceId) -> MastershipRole {
        self.roles.role(device)
    }

    /// Snapshot of locally applied roles
    pub fn role_table(&self) -> Vec<(DeviceId, RoleEntry)> {
        self.roles.snapshot()
    }

    pub async fn ports(&self, device: &DeviceId) -> Vec<Port> {
        self.store.ports(device).await
    }

    pub async fn port(&self, device: &DeviceId, number: PortNumber) -> Option<Port> {
        self.store.port(device, number).await
    }

    pub async fn port_statistics(&self, device: &DeviceId) -> Vec<PortStatistics> {
        self.store.port_statistics(device).await
    }

    pub async fn is_available(&self, device: &DeviceId) -> bool {
        self.store.is_available(device).await
    }

    /// Administratively remove a device
    pub async fn remove_device(&self, device: &DeviceId) {
        if let Some(event) = self.store.remove_device(device).await {
            tracing::info!("Device {} administratively removed", device);
            self.roles.forget(device);
            self.post(event);
        }
    }

    /// Check a device for control channel connectivity
    pub(crate) async fn is_reachable(&self, device: &DeviceId) -> bool {
        match self.providers.provider_for(device).await {
            Some(provider) => provider.is_reachable(device).await,
            None => {
                tracing::debug!("Provider not found for {}", device);
                false
            }
        }
    }

    pub(crate) fn post(&self, event: DeviceEvent) {
        self.events.post(event);
    }

    /// Forward election changes to the reconciliation logic until shutdown
    fn spawn_mastership_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut events = self.mastership.subscribe();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            let device = event.device.clone();
                            let handled = AssertUnwindSafe(manager.handle_mastership_event(event))
                                .catch_unwind()
                                .await;
                            if handled.is_err() {
                                tracing::error!("Panic while handling mastership event for {}", device);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(
                                "Missed {} mastership events; the audit will reconcile",
                                missed
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Mastership listener stopped");
        })
    }
}

#[cfg(test)]
mod tests;
