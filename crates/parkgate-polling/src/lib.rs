//! Polling scheduler for the module bus.
//!
//! The [`PollingScheduler`] owns the link and visits every registered module
//! in configured order, one exchange per turn. Replies update the
//! [`ModuleRegistry`]; presented credentials go through the access validator
//! and are answered on the module's next turns. Everything observable is
//! published on the [`EventBus`], and out-of-band commands arrive through a
//! [`ControlHandle`].
//!
//! ```no_run
//! use parkgate_access::{AccessValidator, MemoryStore};
//! use parkgate_polling::{
//!     ControllerConfig, EventBus, ModuleRegistry, PollingScheduler, SchedulerSettings,
//! };
//! use parkgate_transport::SerialLink;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ControllerConfig::load("parkgate.toml")?;
//! let registry = ModuleRegistry::new(config.modules.clone(), &config.polling)?;
//! let validator = AccessValidator::new(
//!     MemoryStore::with_credentials(config.credentials.clone()),
//!     config.access,
//! );
//! let settings = SchedulerSettings {
//!     polling: config.polling,
//!     timeouts: config.timeouts,
//!     sequence: config.sequence,
//! };
//! let link = SerialLink::open(config.serial.clone())?;
//! let events = EventBus::new(config.polling.event_capacity);
//!
//! let mut scheduler = PollingScheduler::new(link, registry, validator, settings, events);
//! scheduler.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod module;
pub mod registry;
pub mod scheduler;

pub use config::{
    ControllerConfig, DEFAULT_EVENT_CAPACITY, ModuleSource, PollingConfig, TomlModuleSource,
};
pub use control::{CONTROL_CHANNEL_CAPACITY, ControlHandle};
pub use error::{ConfigError, ControlError, RegistryError, SchedulerError};
pub use events::{BusEvent, CommErrorKind, EventBus};
pub use module::{
    FailureOutcome, ModuleConfig, ModuleCounters, ModuleRuntimeState, ModuleSnapshot, StateDelta,
};
pub use registry::{ModuleRegistry, RegistryStats};
pub use scheduler::{CycleReport, PollingScheduler, SchedulerSettings, StepOutcome, StepPhase};
