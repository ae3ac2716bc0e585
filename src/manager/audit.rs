//! Periodic mastership audit.
//!
//! Backstop for roles that were never resolved, e.g. when election events
//! were lost or arrived before the device connected.

use std::sync::Arc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::device::DeviceId;
use crate::manager::DeviceManager;
use crate::mastership::MastershipRole;

impl DeviceManager {
    /// Checks if all the reachable devices have a valid mastership role.
    ///
    /// Each device is checked on its own task, up to the configured number
    /// at once. A check that outlives the per-device timeout is no longer
    /// waited for but runs to completion, so a role it fails to apply is
    /// still relinquished. A panicking check never affects the others.
    pub async fn mastership_check(self: &Arc<Self>) {
        tracing::debug!("Checking mastership");

        let devices = self.store.devices().await;
        let limit = self.config.audit_concurrency;
        let timeout = self.config.device_check_timeout();

        futures::stream::iter(devices)
            .for_each_concurrent(limit, |device| {
                let manager = Arc::clone(self);
                async move {
                    let id = device.id.clone();
                    let mut check = tokio::spawn(async move {
                        manager.check_device(&device.id).await;
                    });
                    match tokio::time::timeout(timeout, &mut check).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::error!("Mastership check of {} failed: {}", id, e)
                        }
                        Err(_) => tracing::warn!(
                            "Mastership check of {} still running after {:?}, no longer waiting",
                            id,
                            timeout
                        ),
                    }
                }
            })
            .await;
    }

    async fn check_device(&self, device: &DeviceId) {
        tracing::trace!("Checking device {}", device);

        if !self.is_reachable(device).await {
            return;
        }

        if self.mastership.local_role(device).await != MastershipRole::None {
            return;
        }

        tracing::info!("{} is reachable but did not have a valid role, reasserting", device);

        // NONE asks the election layer for a role
        self.reassert_role(device, MastershipRole::None).await;
    }

    /// Run the audit with a fixed delay until shutdown
    pub(crate) fn spawn_audit(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let period = self.config.audit_interval();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => manager.mastership_check().await,
                }
            }
            tracing::debug!("Mastership audit stopped");
        })
    }
}
