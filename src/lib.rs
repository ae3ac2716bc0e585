//! WolfMaster - Device Mastership Reconciliation
//!
//! Keeps the local view of which cluster node controls each network device
//! consistent with the cluster-wide election, and pushes the resulting role
//! down to the device through its southbound provider.
//!
//! # Architecture
//!
//! Every node runs a [`manager::DeviceManager`]. Three uncoordinated triggers
//! drive it: provider callbacks (device connect/disconnect, role replies),
//! election change events, and a periodic audit. Each decision re-reads the
//! authoritative mastership term, so only the term owner ever applies
//! MASTER, and any failed assertion is answered by relinquishing the device.
//!
//! # Features
//!
//! - Role reconciliation against per-device terms with stale-epoch guards
//! - Retry of offline marking when ownership moved during disconnect
//! - Periodic audit with bounded concurrency and per-device timeouts
//! - Device, port and mastership events for local listeners
//! - In-process reference election store and simulated providers

pub mod config;
pub mod error;
pub mod device;
pub mod mastership;
pub mod provider;
pub mod event;
pub mod manager;
pub mod simulation;

pub use config::WolfMasterConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfMasterConfig;
    pub use crate::error::{Error, Result};
    pub use crate::device::{DeviceDescription, DeviceEvent, DeviceEventType, DeviceId, PortDescription};
    pub use crate::mastership::{MastershipRole, MastershipService, MastershipTermService, NodeId};
    pub use crate::provider::DeviceProvider;
    pub use crate::manager::{DeviceManager, DeviceProviderService};
}
