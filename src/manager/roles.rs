//! Role Table
//!
//! Per-device record of the role this node last applied southbound and
//! the highest term epoch any decision for the device was based on.
//! Entries are guarded individually; devices never contend with each
//! other.

use dashmap::DashMap;
use serde::Serialize;

use crate::device::DeviceId;
use crate::mastership::MastershipRole;

/// Locally tracked role state of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoleEntry {
    /// Role last applied southbound
    pub role: MastershipRole,
    /// Highest term epoch observed for the device
    pub epoch: u64,
}

impl Default for RoleEntry {
    fn default() -> Self {
        Self {
            role: MastershipRole::None,
            epoch: 0,
        }
    }
}

/// Concurrent per-device role table
#[derive(Default)]
pub struct RoleTable {
    entries: DashMap<DeviceId, RoleEntry>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that a decision is about to be made against `epoch`.
    ///
    /// Returns false if a newer epoch was already observed, in which case
    /// the decision is stale and must be dropped.
    pub fn observe_epoch(&self, device: &DeviceId, epoch: u64) -> bool {
        let mut entry = self.entries.entry(device.clone()).or_default();
        if epoch < entry.epoch {
            return false;
        }
        entry.epoch = epoch;
        true
    }

    /// Record a successfully applied role.
    ///
    /// Returns whether the recorded role changed. A role decided against
    /// an epoch older than the recorded one is not recorded.
    pub fn record(&self, device: &DeviceId, role: MastershipRole, epoch: Option<u64>) -> bool {
        let mut entry = self.entries.entry(device.clone()).or_default();
        if let Some(epoch) = epoch {
            if epoch < entry.epoch {
                return false;
            }
            entry.epoch = epoch;
        }
        let changed = entry.role != role;
        entry.role = role;
        changed
    }

    /// Reset the applied role of a tracked device to NONE, keeping its
    /// epoch. Returns whether a role was cleared.
    pub fn clear_role(&self, device: &DeviceId) -> bool {
        match self.entries.get_mut(device) {
            Some(mut entry) if entry.role != MastershipRole::None => {
                entry.role = MastershipRole::None;
                true
            }
            _ => false,
        }
    }

    /// Role last applied to the device
    pub fn role(&self, device: &DeviceId) -> MastershipRole {
        self.entries
            .get(device)
            .map(|entry| entry.role)
            .unwrap_or(MastershipRole::None)
    }

    /// Highest epoch observed for the device
    pub fn epoch(&self, device: &DeviceId) -> Option<u64> {
        self.entries.get(device).map(|entry| entry.epoch)
    }

    /// Drop everything known about the device
    pub fn forget(&self, device: &DeviceId) {
        self.entries.remove(device);
    }

    /// Copy of the whole table, sorted by device
    pub fn snapshot(&self) -> Vec<(DeviceId, RoleEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_epochs_are_rejected() {
        let table = RoleTable::new();
        let device = DeviceId::new("of:1");

        assert!(table.observe_epoch(&device, 2));
        assert!(table.observe_epoch(&device, 2));
        assert!(table.observe_epoch(&device, 3));
        assert!(!table.observe_epoch(&device, 2));
        assert_eq!(table.epoch(&device), Some(3));
    }

    #[test]
    fn test_record_reports_changes() {
        let table = RoleTable::new();
        let device = DeviceId::new("of:1");

        assert!(table.record(&device, MastershipRole::Master, Some(1)));
        assert!(!table.record(&device, MastershipRole::Master, Some(1)));
        assert!(table.record(&device, MastershipRole::Standby, Some(2)));

        // Decision taken against epoch 1 lost the race
        assert!(!table.record(&device, MastershipRole::Master, Some(1)));
        assert_eq!(table.role(&device), MastershipRole::Standby);

        // Relinquished: the epoch stays
        assert!(table.clear_role(&device));
        assert!(!table.clear_role(&device));
        assert_eq!(table.epoch(&device), Some(2));
        assert!(!table.clear_role(&DeviceId::new("of:2")));

        table.forget(&device);
        assert_eq!(table.role(&device), MastershipRole::None);
        assert!(table.snapshot().is_empty());
    }
}
