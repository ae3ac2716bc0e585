use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::device::{DeviceDescription, DeviceEventType, PortDescription};
use crate::error::Error;
use crate::mastership::{LocalMastershipStore, MastershipEvent, MastershipEventType, RoleInfo};
use crate::provider::SimulatedProvider;

struct TestNode {
    id: NodeId,
    manager: Arc<DeviceManager>,
    provider: Arc<SimulatedProvider>,
    service: DeviceProviderService,
}

async fn start_node_with(store: &Arc<LocalMastershipStore>, config: WolfMasterConfig) -> TestNode {
    let id = config.node_id();
    let manager = DeviceManager::in_memory(&config, store.node(id.clone()));
    let provider = Arc::new(SimulatedProvider::new(ProviderId::new("of", "simulated")));
    let service = manager.register_provider(provider.clone()).await.unwrap();
    manager.activate().await;
    TestNode {
        id,
        manager,
        provider,
        service,
    }
}

async fn start_node(store: &Arc<LocalMastershipStore>, name: &str) -> TestNode {
    start_node_with(store, WolfMasterConfig::for_node(name)).await
}

fn switch() -> DeviceDescription {
    DeviceDescription::switch("acme", "1.0")
}

fn drain(events: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Provider that misbehaves for selected devices and defers to a
/// simulated provider for the rest
struct FaultyProvider {
    inner: SimulatedProvider,
    /// Devices whose reachability check panics
    panics_on: HashSet<DeviceId>,
    /// Devices that refuse every role after `delay`
    slow_rejects: HashSet<DeviceId>,
    delay: Duration,
}

impl FaultyProvider {
    fn new() -> Self {
        Self {
            inner: SimulatedProvider::new(ProviderId::new("of", "faulty")),
            panics_on: HashSet::new(),
            slow_rejects: HashSet::new(),
            delay: Duration::from_millis(200),
        }
    }
}

#[async_trait]
impl DeviceProvider for FaultyProvider {
    fn id(&self) -> &ProviderId {
        self.inner.id()
    }

    async fn role_changed(&self, device: &DeviceId, role: MastershipRole) -> Result<()> {
        if self.slow_rejects.contains(device) {
            tokio::time::sleep(self.delay).await;
            return Err(Error::RoleRejected {
                device: device.clone(),
                role,
                reason: "switch busy".to_string(),
            });
        }
        self.inner.role_changed(device, role).await
    }

    async fn trigger_probe(&self, device: &DeviceId) {
        self.inner.trigger_probe(device).await
    }

    async fn is_reachable(&self, device: &DeviceId) -> bool {
        if self.panics_on.contains(device) {
            panic!("control channel to {} is corrupt", device);
        }
        self.inner.is_reachable(device).await
    }
}

/// An inactive manager serving `provider`, with the given devices in its
/// store but no roles assigned
async fn idle_node_with(
    store: &Arc<LocalMastershipStore>,
    config: WolfMasterConfig,
    provider: Arc<FaultyProvider>,
    devices: &[DeviceId],
) -> Arc<DeviceManager> {
    let manager = DeviceManager::in_memory(&config, store.node(config.node_id()));
    manager.register_provider(provider.clone()).await.unwrap();
    for device in devices {
        provider.inner.set_reachable(device, true).await;
        manager
            .store
            .create_or_update_device(provider.id(), device, switch())
            .await;
    }
    manager
}

#[tokio::test]
async fn test_connect_applies_master_and_probes() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    let mut events = node.manager.subscribe();

    node.provider.set_reachable(&device, true).await;
    node.service.device_connected(&device, switch()).await.unwrap();

    assert_eq!(store.role(&node.id, &device).await, MastershipRole::Master);
    assert_eq!(node.provider.roles_applied(&device).await[0], MastershipRole::Master);
    assert!(node.provider.probe_count(&device).await >= 1);
    assert_eq!(node.manager.applied_role(&device), MastershipRole::Master);
    assert!(node.manager.is_available(&device).await);

    let events = drain(&mut events);
    assert_eq!(events[0].event_type, DeviceEventType::DeviceAdded);
    assert_eq!(events[1].event_type, DeviceEventType::DeviceMastershipChanged);
    assert_eq!(events[1].role, Some(MastershipRole::Master));

    node.manager.deactivate().await;
}

#[tokio::test]
async fn test_second_node_connects_as_standby() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let a = start_node(&store, "node-a").await;
    let b = start_node(&store, "node-b").await;
    let device = DeviceId::new("of:1");
    a.provider.set_reachable(&device, true).await;
    b.provider.set_reachable(&device, true).await;

    a.service.device_connected(&device, switch()).await.unwrap();
    b.service.device_connected(&device, switch()).await.unwrap();

    assert_eq!(store.master(&device).await, Some(a.id.clone()));
    assert_eq!(b.provider.last_role(&device).await, Some(MastershipRole::Standby));
    assert_eq!(b.provider.probe_count(&device).await, 0);
}

#[tokio::test]
async fn test_unreachable_device_gets_no_role() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");

    // Never reachable from this node
    store.set_role(&node.id, &device, MastershipRole::Master).await;
    for _ in 0..50 {
        if store.role(&node.id, &device).await == MastershipRole::None {
            break;
        }
        settle().await;
    }
    assert_eq!(store.role(&node.id, &device).await, MastershipRole::None);

    node.manager.mastership_check().await;
    assert!(node.provider.calls().await.is_empty());
    assert_eq!(node.manager.applied_role(&device), MastershipRole::None);
}

#[tokio::test]
async fn test_reassert_is_idempotent() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    node.provider.set_reachable(&device, true).await;
    node.service.device_connected(&device, switch()).await.unwrap();
    node.manager.deactivate().await;

    node.provider.clear_calls().await;
    let mut events = node.manager.subscribe();

    node.manager.reassert_role(&device, MastershipRole::Master).await;
    node.manager.reassert_role(&device, MastershipRole::Master).await;

    assert_eq!(
        node.provider.roles_applied(&device).await,
        vec![MastershipRole::Master, MastershipRole::Master]
    );
    assert_eq!(node.provider.probe_count(&device).await, 2);
    assert_eq!(node.manager.applied_role(&device), MastershipRole::Master);
    // The role was already MASTER
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_master_without_ownership_falls_back_to_standby() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let a = start_node(&store, "node-a").await;
    let b = start_node(&store, "node-b").await;
    let device = DeviceId::new("of:1");
    a.provider.set_reachable(&device, true).await;
    b.provider.set_reachable(&device, true).await;
    a.service.device_connected(&device, switch()).await.unwrap();
    b.manager.deactivate().await;

    b.manager.reassert_role(&device, MastershipRole::Master).await;

    assert_eq!(b.provider.roles_applied(&device).await, vec![MastershipRole::Standby]);
    assert_eq!(b.provider.probe_count(&device).await, 0);
}

#[tokio::test]
async fn test_decision_on_older_epoch_is_dropped() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    node.provider.set_reachable(&device, true).await;
    node.manager.deactivate().await;

    store.request_role(&node.id, &device).await;
    node.manager.roles.observe_epoch(&device, 99);

    node.manager.reassert_role(&device, MastershipRole::Master).await;
    assert!(node.provider.calls().await.is_empty());
    assert_eq!(node.manager.applied_role(&device), MastershipRole::None);
}

#[tokio::test]
async fn test_disconnect_marks_offline_once_and_relinquishes() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    node.provider.set_reachable(&device, true).await;
    node.service.device_connected(&device, switch()).await.unwrap();
    node.service
        .update_ports(&device, vec![PortDescription::new(1, true), PortDescription::new(2, true)])
        .await
        .unwrap();
    settle().await;

    let mut events = node.manager.subscribe();
    node.provider.set_reachable(&device, false).await;
    node.service.device_disconnected(&device).await.unwrap();

    let events = drain(&mut events);
    assert_eq!(events.iter().filter(|e| e.is_offline()).count(), 1);
    // Port-down updates on disconnect are not published
    assert!(events.iter().all(|e| e.port.is_none()));
    assert!(node.manager.ports(&device).await.iter().all(|p| !p.enabled));
    assert!(!node.manager.is_available(&device).await);
    assert_eq!(store.role(&node.id, &device).await, MastershipRole::None);
    assert!(node.manager.role_table().is_empty());

    // Nothing left to mark
    let mut again = node.manager.subscribe();
    node.service.device_disconnected(&device).await.unwrap();
    assert!(drain(&mut again).is_empty());
}

#[tokio::test]
async fn test_disconnect_after_unobserved_takeover() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let a = start_node(&store, "node-a").await;
    let b = start_node(&store, "node-b").await;
    let device = DeviceId::new("of:1");
    a.provider.set_reachable(&device, true).await;
    b.provider.set_reachable(&device, true).await;

    a.service.device_connected(&device, switch()).await.unwrap();
    b.service.device_connected(&device, switch()).await.unwrap();
    assert_eq!(b.provider.last_role(&device).await, Some(MastershipRole::Standby));

    // Takeover that node-b's listener never sees
    b.manager.deactivate().await;
    store.set_role(&b.id, &device, MastershipRole::Master).await;
    b.manager.activate().await;
    assert!(!b.manager.clock.is_timestamp_available(&device).await);

    let mut events = b.manager.subscribe();
    b.provider.set_reachable(&device, false).await;
    b.service.device_disconnected(&device).await.unwrap();

    let offline = drain(&mut events).iter().filter(|e| e.is_offline()).count();
    assert_eq!(offline, 1);
    assert!(!b.manager.is_available(&device).await);
    assert_eq!(store.role(&b.id, &device).await, MastershipRole::None);
    assert_eq!(store.master(&device).await, Some(a.id.clone()));

    for _ in 0..50 {
        if a.provider.last_role(&device).await == Some(MastershipRole::Master) {
            break;
        }
        settle().await;
    }
    assert_eq!(a.provider.last_role(&device).await, Some(MastershipRole::Master));
}

#[tokio::test]
async fn test_role_reply_master_instead_of_standby_relinquishes() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    node.provider.set_reachable(&device, true).await;
    node.service.device_connected(&device, switch()).await.unwrap();
    settle().await;

    // Keep the listener from claiming the device again
    node.provider.set_reachable(&device, false).await;
    node.service
        .received_role_reply(&device, Some(MastershipRole::Standby), Some(MastershipRole::Master))
        .await
        .unwrap();

    assert_eq!(store.role(&node.id, &device).await, MastershipRole::None);
    assert_eq!(node.manager.applied_role(&device), MastershipRole::None);
}

#[tokio::test]
async fn test_role_reply_variants() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    node.provider.set_reachable(&device, true).await;
    node.service.device_connected(&device, switch()).await.unwrap();
    settle().await;
    node.provider.set_reachable(&device, false).await;

    // Agreement changes nothing
    node.service
        .received_role_reply(&device, Some(MastershipRole::Master), Some(MastershipRole::Master))
        .await
        .unwrap();
    assert_eq!(store.role(&node.id, &device).await, MastershipRole::Master);

    // Refused STANDBY without claiming MASTER is only logged
    node.service
        .received_role_reply(&device, Some(MastershipRole::Standby), None)
        .await
        .unwrap();
    assert_eq!(store.role(&node.id, &device).await, MastershipRole::Master);

    // No answer at all
    node.service.received_role_reply(&device, None, None).await.unwrap();
    assert_eq!(store.role(&node.id, &device).await, MastershipRole::None);
}

#[tokio::test]
async fn test_audit_restores_lost_role() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    node.provider.set_reachable(&device, true).await;
    node.service.device_connected(&device, switch()).await.unwrap();
    node.manager.deactivate().await;

    store.relinquish(&node.id, &device).await;
    assert_eq!(store.role(&node.id, &device).await, MastershipRole::None);
    node.provider.clear_calls().await;

    node.manager.mastership_check().await;

    assert_eq!(store.role(&node.id, &device).await, MastershipRole::Master);
    assert_eq!(node.provider.roles_applied(&device).await, vec![MastershipRole::Master]);
    assert_eq!(node.provider.probe_count(&device).await, 1);
    assert_eq!(node.manager.applied_role(&device), MastershipRole::Master);
    assert_eq!(node.manager.role_table()[0].1.epoch, 2);
}

#[tokio::test]
async fn test_scheduled_audit_runs() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let mut config = WolfMasterConfig::for_node("node-a");
    config.mastership.audit_interval_secs = 1;
    let node = start_node_with(&store, config).await;
    let device = DeviceId::new("of:1");
    node.provider.set_reachable(&device, true).await;
    node.service.device_connected(&device, switch()).await.unwrap();

    // Lose the role while unreachable so only the audit can restore it
    node.provider.set_reachable(&device, false).await;
    store.relinquish(&node.id, &device).await;
    settle().await;
    node.provider.set_reachable(&device, true).await;

    for _ in 0..60 {
        if store.role(&node.id, &device).await == MastershipRole::Master {
            break;
        }
        settle().await;
    }
    assert_eq!(store.role(&node.id, &device).await, MastershipRole::Master);
    node.manager.deactivate().await;
}

#[tokio::test]
async fn test_missing_provider_relinquishes() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    // No provider serves this scheme
    let device = DeviceId::new("netconf:10.0.0.1");

    node.service.device_connected(&device, switch()).await.unwrap();

    assert!(node.manager.device(&device).await.is_some());
    assert_eq!(store.role(&node.id, &device).await, MastershipRole::None);
    assert_eq!(node.manager.applied_role(&device), MastershipRole::None);
}

#[tokio::test]
async fn test_rejected_role_relinquishes() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    node.provider.set_rejecting(&device, true).await;

    node.service.device_connected(&device, switch()).await.unwrap();

    assert_eq!(store.role(&node.id, &device).await, MastershipRole::None);
    assert!(node.provider.roles_applied(&device).await.is_empty());
}

#[tokio::test]
async fn test_port_updates_only_on_master() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let a = start_node(&store, "node-a").await;
    let b = start_node(&store, "node-b").await;
    let device = DeviceId::new("of:1");
    a.provider.set_reachable(&device, true).await;
    b.provider.set_reachable(&device, true).await;
    a.service.device_connected(&device, switch()).await.unwrap();
    b.service.device_connected(&device, switch()).await.unwrap();

    let ports = vec![PortDescription::new(1, true), PortDescription::new(2, false)];
    let mut a_events = a.manager.subscribe();
    a.service.update_ports(&device, ports.clone()).await.unwrap();
    b.service.update_ports(&device, ports).await.unwrap();

    assert_eq!(a.manager.ports(&device).await.len(), 2);
    assert!(b.manager.ports(&device).await.is_empty());

    a.service
        .port_status_changed(&device, PortDescription::new(2, true))
        .await
        .unwrap();
    let port = a.manager.port(&device, PortNumber(2)).await.unwrap();
    assert!(port.enabled);

    let types: Vec<_> = drain(&mut a_events)
        .into_iter()
        .filter(|e| e.port.is_some())
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        vec![
            DeviceEventType::PortAdded,
            DeviceEventType::PortAdded,
            DeviceEventType::PortUpdated
        ]
    );
}

#[tokio::test]
async fn test_port_statistics() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    node.provider.set_reachable(&device, true).await;
    node.service.device_connected(&device, switch()).await.unwrap();

    let stats = PortStatistics {
        port: PortNumber(1),
        packets_received: 10,
        packets_sent: 20,
        bytes_received: 1000,
        bytes_sent: 2000,
        duration_secs: 5,
    };
    let mut events = node.manager.subscribe();
    node.service
        .update_port_statistics(&device, vec![stats.clone()])
        .await
        .unwrap();

    assert_eq!(node.manager.port_statistics(&device).await, vec![stats]);
    assert!(drain(&mut events)
        .iter()
        .any(|e| e.event_type == DeviceEventType::PortStatsUpdated));
}

#[tokio::test]
async fn test_remove_device() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    node.provider.set_reachable(&device, true).await;
    node.service.device_connected(&device, switch()).await.unwrap();
    node.manager.deactivate().await;

    let mut events = node.manager.subscribe();
    node.manager.remove_device(&device).await;

    assert_eq!(node.manager.device_count().await, 0);
    assert_eq!(node.manager.applied_role(&device), MastershipRole::None);
    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, DeviceEventType::DeviceRemoved);

    // Removing twice is quiet
    let mut again = node.manager.subscribe();
    node.manager.remove_device(&device).await;
    assert!(drain(&mut again).is_empty());
}

#[tokio::test]
async fn test_unregistered_provider_is_refused() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");

    assert!(node.manager.unregister_provider(node.service.provider_id()).await);

    let result = node.service.device_connected(&device, switch()).await;
    assert!(matches!(result, Err(Error::ProviderInvalid(_))));
    assert_eq!(node.manager.device_count().await, 0);

    // Same scheme can be claimed again
    let provider = Arc::new(SimulatedProvider::new(ProviderId::new("of", "replacement")));
    assert!(node.manager.register_provider(provider).await.is_ok());
}

#[tokio::test]
async fn test_duplicate_provider_is_refused() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;

    let provider = Arc::new(SimulatedProvider::new(ProviderId::new("of", "other")));
    let result = node.manager.register_provider(provider).await;
    assert!(matches!(result, Err(Error::ProviderAlreadyRegistered(_))));
}

#[tokio::test]
async fn test_callbacks_refused_after_deactivate() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    node.manager.deactivate().await;
    assert!(!node.manager.is_active());

    let result = node.service.device_connected(&device, switch()).await;
    assert!(matches!(result, Err(Error::ShuttingDown)));
    let result = node.service.device_disconnected(&device).await;
    assert!(matches!(result, Err(Error::ShuttingDown)));
}

#[tokio::test]
async fn test_offline_device_comes_back_when_mastered() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:1");
    node.provider.set_reachable(&device, true).await;
    node.service.device_connected(&device, switch()).await.unwrap();
    node.provider.set_reachable(&device, false).await;
    node.service.device_disconnected(&device).await.unwrap();
    node.manager.deactivate().await;
    assert!(!node.manager.is_available(&device).await);

    node.provider.set_reachable(&device, true).await;
    node.manager.mastership_check().await;

    assert!(node.manager.is_available(&device).await);
    assert_eq!(store.role(&node.id, &device).await, MastershipRole::Master);
}

#[tokio::test]
async fn test_reassert_without_request_is_stable() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let a = start_node(&store, "node-a").await;
    let b = start_node(&store, "node-b").await;
    let device = DeviceId::new("of:1");
    a.provider.set_reachable(&device, true).await;
    b.provider.set_reachable(&device, true).await;
    a.service.device_connected(&device, switch()).await.unwrap();
    b.service.device_connected(&device, switch()).await.unwrap();
    a.manager.deactivate().await;
    b.manager.deactivate().await;
    a.provider.clear_calls().await;
    b.provider.clear_calls().await;

    for _ in 0..2 {
        a.manager.reassert_role(&device, MastershipRole::None).await;
        b.manager.reassert_role(&device, MastershipRole::None).await;
    }

    assert_eq!(
        a.provider.roles_applied(&device).await,
        vec![MastershipRole::Master, MastershipRole::Master]
    );
    assert_eq!(a.provider.probe_count(&device).await, 2);
    assert_eq!(
        b.provider.roles_applied(&device).await,
        vec![MastershipRole::Standby, MastershipRole::Standby]
    );
    assert_eq!(b.provider.probe_count(&device).await, 0);

    // Asking again changes nobody's standing
    assert_eq!(store.master(&device).await, Some(a.id.clone()));
    assert_eq!(store.role(&b.id, &device).await, MastershipRole::Standby);
    assert_eq!(a.manager.applied_role(&device), MastershipRole::Master);
    assert_eq!(b.manager.applied_role(&device), MastershipRole::Standby);
}

#[tokio::test]
async fn test_slow_rejection_outliving_audit_timeout_still_relinquishes() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let mut config = WolfMasterConfig::for_node("node-a");
    config.mastership.device_check_timeout_ms = 50;
    let device = DeviceId::new("of:1");
    let mut provider = FaultyProvider::new();
    provider.slow_rejects.insert(device.clone());
    let manager = idle_node_with(&store, config, Arc::new(provider), &[device.clone()]).await;
    let node = manager.local_node().clone();

    for _ in 0..2 {
        let started = std::time::Instant::now();
        manager.mastership_check().await;

        // The pass stopped waiting while the role was still being pushed
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(store.role(&node, &device).await, MastershipRole::Master);

        for _ in 0..50 {
            if store.role(&node, &device).await == MastershipRole::None {
                break;
            }
            settle().await;
        }
        assert_eq!(store.role(&node, &device).await, MastershipRole::None);
        assert_eq!(store.master(&device).await, None);
        assert_eq!(manager.applied_role(&device), MastershipRole::None);
    }
}

#[tokio::test]
async fn test_panicking_check_does_not_stop_the_audit() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let broken = DeviceId::new("of:1");
    let healthy = DeviceId::new("of:2");
    let mut provider = FaultyProvider::new();
    provider.panics_on.insert(broken.clone());
    let provider = Arc::new(provider);
    let manager = idle_node_with(
        &store,
        WolfMasterConfig::for_node("node-a"),
        provider.clone(),
        &[broken.clone(), healthy.clone()],
    )
    .await;
    let node = manager.local_node().clone();

    manager.mastership_check().await;

    assert_eq!(store.role(&node, &healthy).await, MastershipRole::Master);
    assert_eq!(provider.inner.last_role(&healthy).await, Some(MastershipRole::Master));
    assert_eq!(manager.applied_role(&healthy), MastershipRole::Master);
    assert_eq!(store.role(&node, &broken).await, MastershipRole::None);
    assert!(provider.inner.roles_applied(&broken).await.is_empty());
}

#[tokio::test]
async fn test_master_announcement_without_term_applies_standby() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let a = start_node(&store, "node-a").await;
    let b = start_node(&store, "node-b").await;
    let device = DeviceId::new("of:1");
    a.provider.set_reachable(&device, true).await;
    b.provider.set_reachable(&device, true).await;
    a.service.device_connected(&device, switch()).await.unwrap();
    b.service.device_connected(&device, switch()).await.unwrap();
    b.manager.deactivate().await;
    b.provider.clear_calls().await;

    // Announcement names node-b while node-a still owns the term
    b.manager
        .handle_mastership_event(MastershipEvent {
            event_type: MastershipEventType::MasterChanged,
            device: device.clone(),
            role_info: RoleInfo {
                master: Some(b.id.clone()),
                backups: vec![a.id.clone()],
            },
        })
        .await;

    assert_eq!(b.provider.roles_applied(&device).await, vec![MastershipRole::Standby]);
    assert_eq!(b.provider.probe_count(&device).await, 0);
    assert_eq!(b.manager.applied_role(&device), MastershipRole::Standby);
    assert_eq!(store.master(&device).await, Some(a.id.clone()));
}

#[tokio::test]
async fn test_announcement_for_unknown_device_is_ignored() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let node = start_node(&store, "node-a").await;
    let device = DeviceId::new("of:9");
    node.provider.set_reachable(&device, true).await;
    node.manager.deactivate().await;

    node.manager
        .handle_mastership_event(MastershipEvent {
            event_type: MastershipEventType::MasterChanged,
            device: device.clone(),
            role_info: RoleInfo {
                master: Some(node.id.clone()),
                backups: Vec::new(),
            },
        })
        .await;

    assert!(node.provider.calls().await.is_empty());
    assert_eq!(node.manager.applied_role(&device), MastershipRole::None);
    assert_eq!(store.role(&node.id, &device).await, MastershipRole::None);
}

/// Sink that keeps every posted event type
#[derive(Default)]
struct RecordingSink {
    posted: std::sync::Mutex<Vec<DeviceEventType>>,
}

impl EventSink for RecordingSink {
    fn post(&self, event: DeviceEvent) {
        self.posted.lock().unwrap().push(event.event_type);
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        broadcast::channel(1).1
    }
}

#[tokio::test]
async fn test_events_go_to_the_supplied_sink() {
    let store = Arc::new(LocalMastershipStore::new(64));
    let config = WolfMasterConfig::for_node("node-a");
    let local_node = config.node_id();
    let clock = Arc::new(DeviceClock::new(local_node.clone()));
    let mastership = Arc::new(store.node(local_node.clone()));
    let sink = Arc::new(RecordingSink::default());
    let manager = DeviceManager::new(
        local_node,
        config.mastership.clone(),
        sink.clone(),
        Arc::new(InMemoryDeviceStore::new(Arc::clone(&clock))),
        mastership.clone(),
        mastership,
        clock,
        Arc::new(ProviderRegistry::new()),
    );
    let provider = Arc::new(SimulatedProvider::new(ProviderId::new("of", "simulated")));
    let service = manager.register_provider(provider.clone()).await.unwrap();
    manager.activate().await;

    let device = DeviceId::new("of:1");
    provider.set_reachable(&device, true).await;
    service.device_connected(&device, switch()).await.unwrap();
    manager.deactivate().await;

    let posted = sink.posted.lock().unwrap().clone();
    assert_eq!(posted[0], DeviceEventType::DeviceAdded);
    assert!(posted.contains(&DeviceEventType::DeviceMastershipChanged));
}
