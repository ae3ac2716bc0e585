//! Southbound Providers
//!
//! Contract implemented by southbound protocol drivers, and the
//! registry that resolves the provider responsible for a device from
//! its URI scheme.

mod simulated;

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::device::{DeviceId, ProviderId};
use crate::error::{Error, Result};
use crate::mastership::MastershipRole;

pub use simulated::{ProviderCall, SimulatedProvider};

/// Southbound driver for one device URI scheme
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Provider identity
    fn id(&self) -> &ProviderId;

    /// Push a mastership role down to the device
    async fn role_changed(&self, device: &DeviceId, role: MastershipRole) -> Result<()>;

    /// Actively check the control channel to the device
    async fn trigger_probe(&self, device: &DeviceId);

    /// Whether the control channel to the device is usable from this node
    async fn is_reachable(&self, device: &DeviceId) -> bool;
}

/// Registered providers, keyed by device URI scheme
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn DeviceProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for its scheme
    pub async fn register(&self, provider: Arc<dyn DeviceProvider>) -> Result<()> {
        let mut providers = self.providers.write().await;
        let scheme = provider.id().scheme.clone();
        if providers.contains_key(&scheme) {
            return Err(Error::ProviderAlreadyRegistered(scheme));
        }
        tracing::info!("Registered provider {}", provider.id());
        providers.insert(scheme, provider);
        Ok(())
    }

    /// Remove a provider; returns it if it was registered
    pub async fn unregister(&self, id: &ProviderId) -> Option<Arc<dyn DeviceProvider>> {
        let mut providers = self.providers.write().await;
        match providers.get(&id.scheme) {
            Some(provider) if provider.id() == id => {
                tracing::info!("Unregistered provider {}", id);
                providers.remove(&id.scheme)
            }
            _ => None,
        }
    }

    /// Whether this exact provider is still registered
    pub async fn is_registered(&self, id: &ProviderId) -> bool {
        let providers = self.providers.read().await;
        providers
            .get(&id.scheme)
            .map(|provider| provider.id() == id)
            .unwrap_or(false)
    }

    /// Provider responsible for a device
    pub async fn provider_for(&self, device: &DeviceId) -> Option<Arc<dyn DeviceProvider>> {
        let providers = self.providers.read().await;
        providers.get(device.scheme()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_by_scheme() {
        let registry = ProviderRegistry::new();
        let provider = Arc::new(SimulatedProvider::new(ProviderId::new("of", "openflow")));
        registry.register(provider.clone()).await.unwrap();

        assert!(registry.provider_for(&DeviceId::new("of:0001")).await.is_some());
        assert!(registry.provider_for(&DeviceId::new("netconf:10.0.0.1")).await.is_none());

        let duplicate = Arc::new(SimulatedProvider::new(ProviderId::new("of", "other")));
        assert!(matches!(
            registry.register(duplicate.clone()).await,
            Err(Error::ProviderAlreadyRegistered(_))
        ));

        // Only the registered provider itself can be removed
        assert!(registry.unregister(duplicate.id()).await.is_none());
        assert!(registry.unregister(provider.id()).await.is_some());
        assert!(!registry.is_registered(provider.id()).await);
        assert!(registry.provider_for(&DeviceId::new("of:0001")).await.is_none());
    }
}
