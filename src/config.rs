//! WolfMaster Configuration
//!
//! This module provides configuration structures for the mastership
//! reconciliation engine and the operator binary.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::mastership::NodeId;

/// Main WolfMaster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfMasterConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Mastership reconciliation configuration
    #[serde(default)]
    pub mastership: MastershipConfig,

    /// Event delivery configuration
    #[serde(default)]
    pub events: EventsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique cluster node identifier
    pub id: String,
}

/// Mastership reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastershipConfig {
    /// Delay between two mastership audit passes in seconds
    #[serde(default = "default_audit_interval_secs")]
    pub audit_interval_secs: u64,

    /// Maximum number of devices checked at once during an audit pass
    #[serde(default = "default_audit_concurrency")]
    pub audit_concurrency: usize,

    /// Upper bound on a single device check in milliseconds
    #[serde(default = "default_device_check_timeout_ms")]
    pub device_check_timeout_ms: u64,
}

/// Event delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Capacity of the device event broadcast buffer
    #[serde(default = "default_event_buffer_size")]
    pub buffer_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_audit_interval_secs() -> u64 {
    60
}

fn default_audit_concurrency() -> usize {
    16
}

fn default_device_check_timeout_ms() -> u64 {
    5000
}

fn default_event_buffer_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for MastershipConfig {
    fn default() -> Self {
        Self {
            audit_interval_secs: default_audit_interval_secs(),
            audit_concurrency: default_audit_concurrency(),
            device_check_timeout_ms: default_device_check_timeout_ms(),
        }
    }
}

impl MastershipConfig {
    /// Get the audit interval as Duration
    pub fn audit_interval(&self) -> Duration {
        Duration::from_secs(self.audit_interval_secs)
    }

    /// Get the per-device check timeout as Duration
    pub fn device_check_timeout(&self) -> Duration {
        Duration::from_millis(self.device_check_timeout_ms)
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_event_buffer_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfMasterConfig {
    /// Build a configuration for a node with every other setting defaulted
    pub fn for_node(id: impl Into<String>) -> Self {
        Self {
            node: NodeConfig { id: id.into() },
            mastership: MastershipConfig::default(),
            events: EventsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfMasterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.mastership.audit_interval_secs == 0 {
            return Err(crate::Error::Config(
                "mastership.audit_interval_secs must be greater than zero".into(),
            ));
        }

        if self.mastership.audit_concurrency == 0 {
            return Err(crate::Error::Config(
                "mastership.audit_concurrency must be greater than zero".into(),
            ));
        }

        if self.events.buffer_size == 0 {
            return Err(crate::Error::Config("events.buffer_size must be greater than zero".into()));
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" => {}
            other => {
                return Err(crate::Error::Config(format!(
                    "logging.format must be pretty or compact, got {}",
                    other
                )))
            }
        }

        Ok(())
    }

    /// Get this node's identity
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node.id.clone())
    }
}
