//! Error types for the registry, the scheduler and configuration loading.

use parkgate_core::{ModuleAddress, ModuleId};
use parkgate_protocol::CommandError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No module registered at address {0}")]
    UnknownModule(ModuleAddress),

    #[error("Module {0} is offline")]
    ModuleOffline(ModuleAddress),

    #[error("Address {0} is used by more than one module")]
    DuplicateAddress(ModuleAddress),

    #[error("Module id {0} is used more than once")]
    DuplicateModuleId(ModuleId),

    #[error("Polling order {0} is used more than once")]
    DuplicateOrder(u32),

    #[error("Invalid module configuration: {0}")]
    InvalidConfig(String),
}

/// Conditions that stop the polling loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The link could not be reopened after too many consecutive failures.
    #[error("Link lost: {reason}")]
    LinkLost { reason: String },

    #[error("No modules to poll")]
    NoModules,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Failures reported back through a [`ControlHandle`](crate::ControlHandle).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Scheduler is not running")]
    Stopped,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Immediate exchange failed: {0}")]
    Exchange(crate::events::CommErrorKind),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<RegistryError> for ConfigError {
    fn from(err: RegistryError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}
