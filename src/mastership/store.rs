//! Local Mastership Store
//!
//! In-process per-device election shared by every node of a simulated
//! cluster. The first candidate for a device becomes master; when the
//! master relinquishes, the first backup is promoted. Every ownership
//! change bumps the device's epoch.

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::device::DeviceId;
use crate::error::Result;
use crate::mastership::{
    MastershipEvent, MastershipEventType, MastershipRole, MastershipService, MastershipTerm,
    MastershipTermService, NodeId, RoleInfo,
};

/// Election state of a single device
#[derive(Debug, Default)]
struct DeviceElection {
    /// Current master, if any
    master: Option<NodeId>,
    /// Standby candidates in promotion order
    backups: Vec<NodeId>,
    /// Epoch of the latest ownership assignment
    epoch: u64,
}

impl DeviceElection {
    fn role_of(&self, node: &NodeId) -> MastershipRole {
        self.role_info().suggested_role(node)
    }

    fn role_info(&self) -> RoleInfo {
        RoleInfo {
            master: self.master.clone(),
            backups: self.backups.clone(),
        }
    }

    fn term(&self) -> Option<MastershipTerm> {
        self.master
            .as_ref()
            .map(|owner| MastershipTerm::new(owner.clone(), self.epoch))
    }

    /// Hand ownership to a node, bumping the epoch
    fn assign_master(&mut self, node: Option<NodeId>) {
        if let Some(ref node) = node {
            self.backups.retain(|b| b != node);
            self.epoch += 1;
        }
        self.master = node;
    }
}

/// Cluster-wide mastership state
pub struct LocalMastershipStore {
    /// Election state per device
    elections: RwLock<HashMap<DeviceId, DeviceElection>>,
    /// Election change events, delivered to every node
    events: broadcast::Sender<MastershipEvent>,
}

impl LocalMastershipStore {
    /// Create an empty store
    pub fn new(buffer_size: usize) -> Self {
        let (events, _) = broadcast::channel(buffer_size);
        Self {
            elections: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Per-node view of the store
    pub fn node(self: &Arc<Self>, node: NodeId) -> NodeMastership {
        NodeMastership {
            node,
            store: Arc::clone(self),
        }
    }

    fn publish(&self, event_type: MastershipEventType, device: &DeviceId, role_info: RoleInfo) {
        tracing::debug!(
            device = %device,
            master = ?role_info.master,
            backups = role_info.backups.len(),
            "Mastership {:?}",
            event_type
        );
        // No subscribers is fine
        let _ = self.events.send(MastershipEvent {
            event_type,
            device: device.clone(),
            role_info,
        });
    }

    /// Register a node as candidate for a device
    pub async fn request_role(&self, node: &NodeId, device: &DeviceId) -> MastershipRole {
        let (role, change) = {
            let mut elections = self.elections.write().await;
            let election = elections.entry(device.clone()).or_default();

            if election.master.is_none() {
                election.assign_master(Some(node.clone()));
                (
                    MastershipRole::Master,
                    Some((MastershipEventType::MasterChanged, election.role_info())),
                )
            } else {
                match election.role_of(node) {
                    MastershipRole::None => {
                        election.backups.push(node.clone());
                        (
                            MastershipRole::Standby,
                            Some((MastershipEventType::BackupsChanged, election.role_info())),
                        )
                    }
                    role => (role, None),
                }
            }
        };

        if let Some((event_type, role_info)) = change {
            self.publish(event_type, device, role_info);
        }
        role
    }

    /// Withdraw a node's mastership and candidacy for a device
    pub async fn relinquish(&self, node: &NodeId, device: &DeviceId) {
        let change = {
            let mut elections = self.elections.write().await;
            let election = match elections.get_mut(device) {
                Some(election) => election,
                None => return,
            };

            if election.master.as_ref() == Some(node) {
                let next = if election.backups.is_empty() {
                    None
                } else {
                    Some(election.backups.remove(0))
                };
                election.assign_master(next);
                Some((MastershipEventType::MasterChanged, election.role_info()))
            } else if election.backups.contains(node) {
                election.backups.retain(|b| b != node);
                Some((MastershipEventType::BackupsChanged, election.role_info()))
            } else {
                None
            }
        };

        if let Some((event_type, role_info)) = change {
            self.publish(event_type, device, role_info);
        }
    }

    /// Administratively set a node's role for a device
    pub async fn set_role(&self, node: &NodeId, device: &DeviceId, role: MastershipRole) {
        match role {
            MastershipRole::None => self.relinquish(node, device).await,
            MastershipRole::Master => {
                let role_info = {
                    let mut elections = self.elections.write().await;
                    let election = elections.entry(device.clone()).or_default();
                    if election.master.as_ref() == Some(node) {
                        return;
                    }
                    if let Some(previous) = election.master.take() {
                        election.backups.insert(0, previous);
                    }
                    election.assign_master(Some(node.clone()));
                    election.role_info()
                };
                self.publish(MastershipEventType::MasterChanged, device, role_info);
            }
            MastershipRole::Standby => {
                let is_master = self.master(device).await.as_ref() == Some(node);
                if is_master {
                    // Step down, then queue up again behind the promoted backup
                    self.relinquish(node, device).await;
                }
                self.request_role(node, device).await;
            }
        }
    }

    /// Role a node holds for a device
    pub async fn role(&self, node: &NodeId, device: &DeviceId) -> MastershipRole {
        let elections = self.elections.read().await;
        elections
            .get(device)
            .map(|election| election.role_of(node))
            .unwrap_or(MastershipRole::None)
    }

    /// Current master of a device
    pub async fn master(&self, device: &DeviceId) -> Option<NodeId> {
        let elections = self.elections.read().await;
        elections.get(device).and_then(|election| election.master.clone())
    }

    /// Current term of a device
    pub async fn term(&self, device: &DeviceId) -> Option<MastershipTerm> {
        let elections = self.elections.read().await;
        elections.get(device).and_then(|election| election.term())
    }

    /// Current election snapshot of a device
    pub async fn role_info(&self, device: &DeviceId) -> RoleInfo {
        let elections = self.elections.read().await;
        elections
            .get(device)
            .map(|election| election.role_info())
            .unwrap_or_default()
    }

    /// Subscribe to election change events
    pub fn subscribe(&self) -> broadcast::Receiver<MastershipEvent> {
        self.events.subscribe()
    }
}

/// One node's view of the [`LocalMastershipStore`]
#[derive(Clone)]
pub struct NodeMastership {
    node: NodeId,
    store: Arc<LocalMastershipStore>,
}

impl NodeMastership {
    /// The node this view acts for
    pub fn node_id(&self) -> &NodeId {
        &self.node
    }

    /// The shared store behind this view
    pub fn store(&self) -> &Arc<LocalMastershipStore> {
        &self.store
    }
}

#[async_trait]
impl MastershipService for NodeMastership {
    async fn request_role_for(&self, device: &DeviceId) -> Result<MastershipRole> {
        Ok(self.store.request_role(&self.node, device).await)
    }

    async fn local_role(&self, device: &DeviceId) -> MastershipRole {
        self.store.role(&self.node, device).await
    }

    async fn relinquish_mastership(&self, device: &DeviceId) -> Result<()> {
        self.store.relinquish(&self.node, device).await;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<MastershipEvent> {
        self.store.subscribe()
    }
}

#[async_trait]
impl MastershipTermService for NodeMastership {
    async fn mastership_term(&self, device: &DeviceId) -> Option<MastershipTerm> {
        self.store.term(device).await
    }
}
