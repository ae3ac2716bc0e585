//! Device Clock
//!
//! Issues ownership timestamps for device state. A node may only
//! timestamp (and therefore authoritatively write) a device once it has
//! been handed a mastership term naming it as owner.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::device::DeviceId;
use crate::mastership::{MastershipTerm, NodeId};

/// Logical timestamp: term epoch first, then a per-term sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub epoch: u64,
    pub sequence: u64,
}

struct ClockEntry {
    term: MastershipTerm,
    sequence: u64,
}

/// Per-device ownership clock for one node
pub struct DeviceClock {
    /// This node's ID
    local_node: NodeId,
    /// Latest term handed to the clock, per device
    entries: RwLock<HashMap<DeviceId, ClockEntry>>,
}

impl DeviceClock {
    /// Create a clock for the given node
    pub fn new(local_node: NodeId) -> Self {
        Self {
            local_node,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record the mastership term for a device.
    ///
    /// Terms older than the one already recorded are ignored; returns
    /// whether the term was accepted.
    pub async fn set_mastership_term(&self, device: &DeviceId, term: MastershipTerm) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(device) {
            Some(entry) if term.epoch < entry.term.epoch => {
                tracing::debug!(
                    device = %device,
                    epoch = term.epoch,
                    current = entry.term.epoch,
                    "Ignoring stale mastership term"
                );
                false
            }
            Some(entry) => {
                if term.epoch > entry.term.epoch {
                    entry.sequence = 0;
                }
                entry.term = term;
                true
            }
            None => {
                entries.insert(device.clone(), ClockEntry { term, sequence: 0 });
                true
            }
        }
    }

    /// Whether this node can timestamp updates for the device
    pub async fn is_timestamp_available(&self, device: &DeviceId) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(device)
            .map(|entry| entry.term.owner == self.local_node)
            .unwrap_or(false)
    }

    /// Issue the next timestamp for a device, if this node owns it
    pub async fn next_timestamp(&self, device: &DeviceId) -> Option<Timestamp> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(device)?;
        if entry.term.owner != self.local_node {
            return None;
        }
        entry.sequence += 1;
        Some(Timestamp {
            epoch: entry.term.epoch,
            sequence: entry.sequence,
        })
    }

    /// The term last handed to the clock for a device
    pub async fn term(&self, device: &DeviceId) -> Option<MastershipTerm> {
        let entries = self.entries.read().await;
        entries.get(device).map(|entry| entry.term.clone())
    }
}
