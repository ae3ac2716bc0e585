//! Mastership Module
//!
//! Cluster-side contracts the device manager consumes: per-device
//! candidacy and relinquishment, the authoritative mastership term, and
//! the stream of election change events.

mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::device::DeviceId;
use crate::error::Result;

pub use store::{LocalMastershipStore, NodeMastership};

/// Globally unique cluster member identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of this node towards a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MastershipRole {
    /// No role assigned or requested yet
    None,
    /// Actively controls the device
    Master,
    /// Connected, ready to take over
    Standby,
}

impl std::fmt::Display for MastershipRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MastershipRole::None => write!(f, "NONE"),
            MastershipRole::Master => write!(f, "MASTER"),
            MastershipRole::Standby => write!(f, "STANDBY"),
        }
    }
}

/// Authoritative ownership of a device: owner plus a per-device epoch
/// that strictly increases on every ownership change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MastershipTerm {
    pub owner: NodeId,
    pub epoch: u64,
}

impl MastershipTerm {
    pub fn new(owner: NodeId, epoch: u64) -> Self {
        Self { owner, epoch }
    }
}

/// Election snapshot broadcast on leadership change. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleInfo {
    pub master: Option<NodeId>,
    pub backups: Vec<NodeId>,
}

impl RoleInfo {
    /// Role this snapshot suggests for a node
    pub fn suggested_role(&self, node: &NodeId) -> MastershipRole {
        if self.master.as_ref() == Some(node) {
            MastershipRole::Master
        } else if self.backups.contains(node) {
            MastershipRole::Standby
        } else {
            MastershipRole::None
        }
    }
}

/// Kind of mastership event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MastershipEventType {
    /// The master for the device changed
    MasterChanged,
    /// Only the backup list changed
    BackupsChanged,
}

/// Election change notification for one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastershipEvent {
    pub event_type: MastershipEventType,
    pub device: DeviceId,
    pub role_info: RoleInfo,
}

/// Per-device election service, as seen from one node
#[async_trait]
pub trait MastershipService: Send + Sync {
    /// Become a candidate for the device; returns the resulting local role
    async fn request_role_for(&self, device: &DeviceId) -> Result<MastershipRole>;

    /// Role this node currently holds for the device
    async fn local_role(&self, device: &DeviceId) -> MastershipRole;

    /// Give up mastership and candidacy for the device
    async fn relinquish_mastership(&self, device: &DeviceId) -> Result<()>;

    /// Subscribe to election change events
    fn subscribe(&self) -> broadcast::Receiver<MastershipEvent>;
}

/// Source of authoritative mastership terms
#[async_trait]
pub trait MastershipTermService: Send + Sync {
    /// Current term for the device, if anyone owns it
    async fn mastership_term(&self, device: &DeviceId) -> Option<MastershipTerm>;
}
