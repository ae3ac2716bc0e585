//! Election change handling.

use crate::manager::DeviceManager;
use crate::mastership::{MastershipEvent, MastershipEventType, MastershipRole};

impl DeviceManager {
    /// React to an election change for a device.
    ///
    /// Backup-only changes are ignored. The announced role is advisory: a
    /// MASTER suggestion is confirmed against the term first. A device we
    /// cannot reach is relinquished instead of reconciled.
    pub(crate) async fn handle_mastership_event(&self, event: MastershipEvent) {
        if event.event_type != MastershipEventType::MasterChanged {
            // Don't care if backup list changed
            return;
        }

        let device = &event.device;
        let suggested = match event.role_info.suggested_role(&self.local_node) {
            MastershipRole::Master => {
                let term = self.observe_term(device).await;
                if self.owns(term.as_ref()) {
                    MastershipRole::Master
                } else {
                    MastershipRole::Standby
                }
            }
            role => role,
        };

        if !self.is_reachable(device).await {
            if suggested != MastershipRole::None {
                tracing::warn!(
                    "Node was instructed to be {} role for {}, but this node cannot reach the device. Relinquishing role.",
                    suggested,
                    device
                );
                self.relinquish(device).await;
            }
            return;
        }

        if self.store.device(device).await.is_some() {
            self.reassert_role(device, suggested).await;
        } else {
            tracing::warn!("Device is not yet/no longer in the store: {}", device);
        }
    }
}
