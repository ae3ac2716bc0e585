//! Role reconciliation: deciding and applying this node's role for a
//! device against the authoritative term.

use crate::device::{DeviceEvent, DeviceId};
use crate::error::Result;
use crate::manager::DeviceManager;
use crate::mastership::{MastershipRole, MastershipTerm};

impl DeviceManager {
    /// Reassert this node's role for a connected device.
    ///
    /// With NONE, candidacy is requested and the role is derived from the
    /// current term: MASTER if this node owns it, STANDBY otherwise.
    /// MASTER is only ever applied when a fresh term read confirms this
    /// node as owner. A decision based on an epoch older than one already
    /// seen for the device is dropped.
    pub async fn reassert_role(&self, device: &DeviceId, requested: MastershipRole) {
        if requested == MastershipRole::None {
            if let Err(e) = self.mastership.request_role_for(device).await {
                tracing::warn!("Failed to request role for {}: {}", device, e);
            }
        }

        let term = self.observe_term(device).await;
        let owned = self.owns(term.as_ref());
        let target = match requested {
            MastershipRole::Standby => MastershipRole::Standby,
            _ if owned => MastershipRole::Master,
            MastershipRole::Master => {
                tracing::warn!(
                    device = %device,
                    owner = ?term.as_ref().map(|t| &t.owner),
                    "Told to be MASTER without owning the term, falling back to STANDBY"
                );
                MastershipRole::Standby
            }
            MastershipRole::None => MastershipRole::Standby,
        };

        let epoch = term.as_ref().map(|t| t.epoch);
        if let Some(epoch) = epoch {
            if !self.roles.observe_epoch(device, epoch) {
                tracing::debug!(
                    device = %device,
                    epoch,
                    "Dropping {} decision, a newer term was already observed",
                    target
                );
                return;
            }
        }

        if target == MastershipRole::Master {
            self.mark_online(device).await;
        }

        tracing::info!(device = %device, epoch = ?epoch, "Applying role {} to {}", target, device);
        let result = self.applier.apply_role(device, target).await;
        self.settle_role(device, target, epoch, result).await;
    }

    /// Read the current term and hand it to the device clock
    pub(crate) async fn observe_term(&self, device: &DeviceId) -> Option<MastershipTerm> {
        let term = self.terms.mastership_term(device).await;
        if let Some(ref term) = term {
            self.clock.set_mastership_term(device, term.clone()).await;
        }
        term
    }

    pub(crate) fn owns(&self, term: Option<&MastershipTerm>) -> bool {
        term.map(|t| t.owner == self.local_node).unwrap_or(false)
    }

    /// Record a successful role application, or relinquish after a failed one.
    /// Returns whether the role was applied.
    pub(crate) async fn settle_role(
        &self,
        device: &DeviceId,
        role: MastershipRole,
        epoch: Option<u64>,
        result: Result<()>,
    ) -> bool {
        match result {
            Ok(()) => {
                if self.roles.record(device, role, epoch) {
                    self.post_role_change(device, role).await;
                }
                true
            }
            Err(e) => {
                if e.should_relinquish() {
                    tracing::warn!("Failed to apply role {} to {}: {}", role, device, e);
                } else {
                    tracing::error!("Unexpected failure applying role {} to {}: {}", role, device, e);
                }
                self.relinquish(device).await;
                false
            }
        }
    }

    /// Give up this node's claim on a device
    pub(crate) async fn relinquish(&self, device: &DeviceId) {
        if let Err(e) = self.mastership.relinquish_mastership(device).await {
            tracing::warn!("Failed to relinquish mastership of {}: {}", device, e);
        }
        if self.roles.clear_role(device) {
            self.post_role_change(device, MastershipRole::None).await;
        }
    }

    /// Flag a known but offline device as online before taking control of it
    async fn mark_online(&self, device: &DeviceId) {
        let existing = match self.store.device(device).await {
            Some(existing) if !existing.available => existing,
            _ => return,
        };

        let event = self
            .store
            .create_or_update_device(&existing.provider_id, device, existing.description)
            .await;
        if let Some(event) = event {
            self.post(event);
        }
    }

    async fn post_role_change(&self, device: &DeviceId, role: MastershipRole) {
        if let Some(current) = self.store.device(device).await {
            self.post(DeviceEvent::mastership_changed(current, role));
        }
    }
}
