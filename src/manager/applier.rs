//! Role Applier
//!
//! Pushes a mastership role to a device through its provider and, after
//! becoming MASTER, probes the control channel.

use std::sync::Arc;

use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::mastership::MastershipRole;
use crate::provider::ProviderRegistry;

pub struct RoleApplier {
    providers: Arc<ProviderRegistry>,
}

impl RoleApplier {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    /// Apply a role to a device and probe it if the role is MASTER.
    ///
    /// NONE is a no-op. Fails with [`Error::NoProvider`] if no provider
    /// handles the device, or with the provider's own error if the device
    /// refused the role.
    pub async fn apply_role(&self, device: &DeviceId, role: MastershipRole) -> Result<()> {
        if role == MastershipRole::None {
            return Ok(());
        }

        let provider = match self.providers.provider_for(device).await {
            Some(provider) => provider,
            None => {
                tracing::warn!("Provider for {} was not found. Cannot apply role {}", device, role);
                return Err(Error::NoProvider(device.clone()));
            }
        };

        provider.role_changed(device, role).await?;

        if role == MastershipRole::Master {
            provider.trigger_probe(device).await;
        }
        Ok(())
    }
}
