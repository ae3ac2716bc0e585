//! WolfMaster Error Types

use thiserror::Error;

use crate::device::DeviceId;
use crate::mastership::MastershipRole;

/// Result type alias for WolfMaster operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfMaster error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Mastership errors
    #[error("Stale mastership for {0}: this node holds no current ownership timestamp")]
    StaleMastership(DeviceId),

    // Southbound errors
    #[error("No provider registered for {0}")]
    NoProvider(DeviceId),

    #[error("Device {device} rejected role {role}: {reason}")]
    RoleRejected {
        device: DeviceId,
        role: MastershipRole,
        reason: String,
    },

    #[error("Provider already registered for scheme {0}")]
    ProviderAlreadyRegistered(String),

    #[error("Provider {0} is no longer registered")]
    ProviderInvalid(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error means our view of mastership is out of date,
    /// recoverable by re-reading the term
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::StaleMastership(_))
    }

    /// Check if this error is a failed role application that must be
    /// answered by giving up our claim on the device
    pub fn should_relinquish(&self) -> bool {
        matches!(
            self,
            Error::NoProvider(_) | Error::RoleRejected { .. }
        )
    }
}
