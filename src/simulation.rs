//! Simulated Cluster
//!
//! Runs several device managers in one process. All nodes share a
//! [`LocalMastershipStore`]; each has its own device store replica and its
//! own [`SimulatedProvider`] standing in for the southbound connection.
//! Used by the `simulate` command and by multi-node tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::WolfMasterConfig;
use crate::device::{DeviceDescription, DeviceEvent, DeviceEventType, DeviceId, ProviderId};
use crate::error::{Error, Result};
use crate::manager::{DeviceManager, DeviceProviderService, RoleEntry};
use crate::mastership::{LocalMastershipStore, MastershipRole, NodeId};
use crate::provider::SimulatedProvider;

/// URI scheme served by every simulated provider
pub const SIMULATED_SCHEME: &str = "sim";

/// One member of the simulated cluster
pub struct SimNode {
    pub id: NodeId,
    pub manager: Arc<DeviceManager>,
    pub provider: Arc<SimulatedProvider>,
    pub service: DeviceProviderService,
}

/// A device event as seen by one node
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub node: NodeId,
    pub event_type: DeviceEventType,
    pub device: DeviceId,
    pub available: bool,
    pub role: Option<MastershipRole>,
    pub time: DateTime<Utc>,
}

impl RecordedEvent {
    fn new(node: &NodeId, event: DeviceEvent) -> Self {
        Self {
            node: node.clone(),
            event_type: event.event_type,
            device: event.device.id,
            available: event.device.available,
            role: event.role,
            time: event.time,
        }
    }
}

/// State of one device on one node
#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub device: DeviceId,
    /// Role last applied southbound
    pub applied: MastershipRole,
    /// Role held in the election
    pub elected: MastershipRole,
    /// Highest epoch the node based a decision on
    pub epoch: u64,
    /// Availability in the node's replica
    pub available: bool,
}

/// State of one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub node: NodeId,
    pub active: bool,
    pub devices: Vec<DeviceView>,
}

/// Cluster-wide snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ClusterView {
    /// Elected master per device
    pub masters: BTreeMap<String, Option<NodeId>>,
    pub nodes: Vec<NodeView>,
}

/// In-process cluster of device managers
pub struct Cluster {
    store: Arc<LocalMastershipStore>,
    nodes: Vec<SimNode>,
    /// Every device ever connected
    devices: RwLock<BTreeSet<DeviceId>>,
    /// Device events from all nodes, in arrival order
    events: Arc<Mutex<Vec<RecordedEvent>>>,
    /// Stops the event collectors
    shutdown: watch::Sender<bool>,
    collectors: Mutex<Vec<JoinHandle<()>>>,
}

impl Cluster {
    /// Start `size` nodes named `<node.id>-1` .. `<node.id>-N`, each with
    /// the settings of `template`
    pub async fn start(template: &WolfMasterConfig, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("cluster needs at least one node".into()));
        }

        let store = Arc::new(LocalMastershipStore::new(template.events.buffer_size));
        let events = Arc::new(Mutex::new(Vec::new()));
        let (shutdown, _) = watch::channel(false);
        let mut nodes = Vec::with_capacity(size);
        let mut collectors = Vec::with_capacity(size);

        for i in 1..=size {
            let mut config = template.clone();
            config.node.id = format!("{}-{}", template.node.id, i);
            config.validate()?;

            let id = config.node_id();
            let manager = DeviceManager::in_memory(&config, store.node(id.clone()));
            let provider = Arc::new(SimulatedProvider::new(ProviderId::new(
                SIMULATED_SCHEME,
                format!("simulated@{}", id),
            )));
            let service = manager.register_provider(provider.clone()).await?;

            collectors.push(spawn_collector(
                id.clone(),
                manager.subscribe(),
                Arc::clone(&events),
                shutdown.subscribe(),
            ));
            manager.activate().await;

            nodes.push(SimNode {
                id,
                manager,
                provider,
                service,
            });
        }

        tracing::info!("Simulated cluster of {} node(s) started", size);

        Ok(Self {
            store,
            nodes,
            devices: RwLock::new(BTreeSet::new()),
            events,
            shutdown,
            collectors: Mutex::new(collectors),
        })
    }

    pub fn store(&self) -> &Arc<LocalMastershipStore> {
        &self.store
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn node(&self, id: &NodeId) -> Option<&SimNode> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// Devices connected so far
    pub async fn devices(&self) -> Vec<DeviceId> {
        self.devices.read().await.iter().cloned().collect()
    }

    /// Connect a device to every node at once, in random order
    pub async fn connect(&self, device: &DeviceId) -> Result<()> {
        self.devices.write().await.insert(device.clone());

        let mut order: Vec<&SimNode> = self.nodes.iter().collect();
        order.shuffle(&mut rand::thread_rng());

        let description = DeviceDescription::switch("wolfmaster", env!("CARGO_PKG_VERSION"));
        let connects = order.into_iter().map(|node| {
            let description = description.clone();
            async move {
                node.provider.set_reachable(device, true).await;
                node.service.device_connected(device, description).await
            }
        });

        for result in futures::future::join_all(connects).await {
            result?;
        }
        Ok(())
    }

    /// Cut the connection between one node and a device
    pub async fn disconnect(&self, node: &NodeId, device: &DeviceId) -> Result<()> {
        let node = self
            .node(node)
            .ok_or_else(|| Error::Internal(format!("unknown node {}", node)))?;
        node.provider.set_reachable(device, false).await;
        node.service.device_disconnected(device).await
    }

    /// Node the election currently gives the device to
    pub async fn master_of(&self, device: &DeviceId) -> Option<NodeId> {
        self.store.master(device).await
    }

    /// Whether the elected master of every device has applied MASTER and
    /// no other node has
    pub async fn is_converged(&self) -> bool {
        for device in self.devices().await {
            let master = match self.store.master(&device).await {
                Some(master) => master,
                None => return false,
            };
            for node in &self.nodes {
                let applied = node.manager.applied_role(&device) == MastershipRole::Master;
                if applied != (node.id == master) {
                    return false;
                }
            }
        }
        true
    }

    /// Wait until [`Cluster::is_converged`] holds, or give up after `timeout`
    pub async fn wait_for_convergence(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_converged().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Current state of every node
    pub async fn view(&self) -> ClusterView {
        let devices = self.devices().await;

        let mut masters = BTreeMap::new();
        for device in &devices {
            masters.insert(device.to_string(), self.store.master(device).await);
        }

        let mut nodes = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let roles: BTreeMap<DeviceId, RoleEntry> = node.manager.role_table().into_iter().collect();

            let mut views = Vec::with_capacity(devices.len());
            for device in &devices {
                let entry = roles.get(device).copied().unwrap_or_default();
                views.push(DeviceView {
                    device: device.clone(),
                    applied: entry.role,
                    elected: node.manager.role(device).await,
                    epoch: entry.epoch,
                    available: node.manager.is_available(device).await,
                });
            }
            nodes.push(NodeView {
                node: node.id.clone(),
                active: node.manager.is_active(),
                devices: views,
            });
        }

        ClusterView { masters, nodes }
    }

    /// Events collected so far
    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().await.clone()
    }

    /// Deactivate every node and stop collecting events
    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.manager.deactivate().await;
        }

        self.shutdown.send_replace(true);
        let handles: Vec<_> = self.collectors.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("Event collector ended abnormally: {}", e);
            }
        }
        tracing::info!("Simulated cluster stopped");
    }
}

fn spawn_collector(
    node: NodeId,
    mut events: broadcast::Receiver<DeviceEvent>,
    sink: Arc<Mutex<Vec<RecordedEvent>>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = events.recv() => match received {
                    Ok(event) => sink.lock().await.push(RecordedEvent::new(&node, event)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("{} missed {} device events", node, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        // Pick up whatever arrived before shutdown
        while let Ok(event) = events.try_recv() {
            sink.lock().await.push(RecordedEvent::new(&node, event));
        }
    })
}
