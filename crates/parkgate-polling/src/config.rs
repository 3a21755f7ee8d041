//! Controller configuration file.
//!
//! One TOML file carries every section. Each section has defaults, so a file
//! that lists only `[[modules]]` is complete:
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//!
//! [polling]
//! inter_module_pause_ms = 100
//!
//! [[modules]]
//! id = 1
//! address = 1
//! name = "Entry barrier"
//! order = 1
//! group = 1
//! direction = "entry"
//! requires_ticket = true
//! ```

use crate::error::ConfigError;
use crate::module::ModuleConfig;
use parkgate_access::{Credential, SequenceConfig, ValidatorConfig};
use parkgate_core::constants::{
    DEFAULT_INTER_MODULE_PAUSE_MS, DEFAULT_MAX_PENDING, DEFAULT_OFFLINE_THRESHOLD,
    DEFAULT_REOPEN_THRESHOLD,
};
use parkgate_transport::{SerialConfig, TimeoutTable};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default capacity of the event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// The `[polling]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Pause between two module iterations.
    #[serde(default = "default_inter_module_pause_ms")]
    pub inter_module_pause_ms: u64,
    /// Consecutive failures after which a module is offline.
    #[serde(default = "default_offline_threshold")]
    pub offline_threshold: u32,
    /// Consecutive failures across all modules after which the link is
    /// reopened.
    #[serde(default = "default_reopen_threshold")]
    pub reopen_threshold: u32,
    /// Bound of each module's pending command queue.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_inter_module_pause_ms() -> u64 {
    DEFAULT_INTER_MODULE_PAUSE_MS
}

fn default_offline_threshold() -> u32 {
    DEFAULT_OFFLINE_THRESHOLD
}

fn default_reopen_threshold() -> u32 {
    DEFAULT_REOPEN_THRESHOLD
}

fn default_max_pending() -> usize {
    DEFAULT_MAX_PENDING
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            inter_module_pause_ms: DEFAULT_INTER_MODULE_PAUSE_MS,
            offline_threshold: DEFAULT_OFFLINE_THRESHOLD,
            reopen_threshold: DEFAULT_REOPEN_THRESHOLD,
            max_pending: DEFAULT_MAX_PENDING,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl PollingConfig {
    pub fn inter_module_pause(&self) -> Duration {
        Duration::from_millis(self.inter_module_pause_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.offline_threshold == 0 {
            return Err(ConfigError::Invalid(
                "polling.offline_threshold must be at least 1".into(),
            ));
        }
        if self.reopen_threshold == 0 {
            return Err(ConfigError::Invalid(
                "polling.reopen_threshold must be at least 1".into(),
            ));
        }
        if self.max_pending == 0 {
            return Err(ConfigError::Invalid(
                "polling.max_pending must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "polling.event_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub timeouts: TimeoutTable,
    #[serde(default)]
    pub access: ValidatorConfig,
    #[serde(default)]
    pub sequence: SequenceConfig,
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    /// Credentials for the in-memory store (demo and test setups).
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

impl ControllerConfig {
    /// Read and validate a configuration file.
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - `ConfigError::Parse` if it is not valid TOML for this schema
    /// - `ConfigError::Invalid` if a section is out of range
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.polling.validate()?;
        Ok(config)
    }
}

/// Source of the module list for a session.
pub trait ModuleSource {
    /// Load every module to be polled.
    fn load_modules(&self) -> Result<Vec<ModuleConfig>, ConfigError>;
}

/// [`ModuleSource`] reading the `[[modules]]` table of a configuration file.
#[derive(Debug, Clone)]
pub struct TomlModuleSource {
    path: PathBuf,
}

impl TomlModuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModuleSource for TomlModuleSource {
    fn load_modules(&self) -> Result<Vec<ModuleConfig>, ConfigError> {
        ControllerConfig::load(&self.path).map(|config| config.modules)
    }
}

/// A fixed module list.
impl ModuleSource for Vec<ModuleConfig> {
    fn load_modules(&self) -> Result<Vec<ModuleConfig>, ConfigError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parkgate_core::{Direction, ModuleAddress};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[serial]
port = "/dev/ttyS3"
baud_rate = 19200

[polling]
inter_module_pause_ms = 50
offline_threshold = 5

[timeouts]
status_ms = 500

[access]
min_dwell_secs = 120
antipassback = false

[sequence]
settle_delay_ms = 1500

[[modules]]
id = 1
address = 1
name = "Entry barrier"
order = 1
group = 1
direction = "entry"
pulse_ms = 800
requires_ticket = true

[[modules]]
id = 2
address = 2
name = "Exit barrier"
order = 2
group = 1
direction = "exit"

[[credentials]]
identification = "00001234"
active = true
"#;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_file() {
        let file = write_config(SAMPLE);
        let config = ControllerConfig::load(file.path()).unwrap();

        assert_eq!(config.serial.port, "/dev/ttyS3");
        assert_eq!(config.serial.baud_rate, 19200);
        assert_eq!(config.polling.inter_module_pause(), Duration::from_millis(50));
        assert_eq!(config.polling.offline_threshold, 5);
        assert_eq!(config.polling.reopen_threshold, DEFAULT_REOPEN_THRESHOLD);
        assert_eq!(config.timeouts.status_ms, 500);
        assert!(!config.access.antipassback);
        assert_eq!(config.access.min_dwell_secs, 120);
        assert_eq!(config.sequence.settle_delay_ms, 1500);
        assert_eq!(config.sequence.presented_timeout_ms, 30_000);
        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.modules[1].direction, Direction::Exit);
        assert_eq!(config.credentials.len(), 1);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let file = write_config("");
        let config = ControllerConfig::load(file.path()).unwrap();
        assert_eq!(config.polling, PollingConfig::default());
        assert!(config.modules.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let err = ControllerConfig::load("/nonexistent/parkgate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_bad_address_is_parse_error() {
        let file = write_config(
            r#"
[[modules]]
id = 1
address = 100
name = "x"
order = 1
group = 1
direction = "entry"
"#,
        );
        let err = ControllerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let file = write_config("[polling]\noffline_threshold = 0\n");
        let err = ControllerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_toml_module_source() {
        let file = write_config(SAMPLE);
        let source = TomlModuleSource::new(file.path());
        let modules = source.load_modules().unwrap();

        assert_eq!(modules[0].address, ModuleAddress::new(1).unwrap());
        assert_eq!(modules[0].pulse_ms, 800);
        assert!(modules[0].requires_ticket);
    }
}
