//! Serial port and timeout configuration.
//!
//! Both types deserialize from the `[serial]` and `[timeouts]` tables of the
//! configuration file; every field has a default.

use parkgate_core::constants::{
    DEFAULT_CONTROL_TIMEOUT_MS, DEFAULT_PULSE_TIMEOUT_MS, DEFAULT_STATUS_TIMEOUT_MS,
    DEFAULT_TIME_SYNC_TIMEOUT_MS,
};
use parkgate_protocol::{Opcode, OpcodeClass};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    #[default]
    None,
    Even,
    Odd,
}

impl From<ParitySetting> for tokio_serial::Parity {
    fn from(parity: ParitySetting) -> Self {
        match parity {
            ParitySetting::None => tokio_serial::Parity::None,
            ParitySetting::Even => tokio_serial::Parity::Even,
            ParitySetting::Odd => tokio_serial::Parity::Odd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// 5-8
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: ParitySetting,
    /// 1 or 2
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Drive RTS by hand around each transmission. Disable for adapters
    /// that switch direction in hardware.
    #[serde(default = "default_rts_control")]
    pub rts_control: bool,
    /// Settle time after asserting RTS, before the first byte.
    #[serde(default = "default_rts_delay_ms")]
    pub rts_enable_delay_ms: u64,
    /// Settle time after the last byte, before releasing RTS.
    #[serde(default = "default_rts_delay_ms")]
    pub rts_disable_delay_ms: u64,
    /// Pause between closing and reopening the port.
    #[serde(default = "default_reopen_pause_ms")]
    pub reopen_pause_ms: u64,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_rts_control() -> bool {
    true
}

fn default_rts_delay_ms() -> u64 {
    10
}

fn default_reopen_pause_ms() -> u64 {
    500
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: ParitySetting::default(),
            stop_bits: default_stop_bits(),
            rts_control: default_rts_control(),
            rts_enable_delay_ms: default_rts_delay_ms(),
            rts_disable_delay_ms: default_rts_delay_ms(),
            reopen_pause_ms: default_reopen_pause_ms(),
        }
    }
}

impl SerialConfig {
    pub fn rts_enable_delay(&self) -> Duration {
        Duration::from_millis(self.rts_enable_delay_ms)
    }

    pub fn rts_disable_delay(&self) -> Duration {
        Duration::from_millis(self.rts_disable_delay_ms)
    }

    pub fn reopen_pause(&self) -> Duration {
        Duration::from_millis(self.reopen_pause_ms)
    }

    /// Map the configured character size, or `None` if out of range.
    pub fn data_bits(&self) -> Option<tokio_serial::DataBits> {
        match self.data_bits {
            5 => Some(tokio_serial::DataBits::Five),
            6 => Some(tokio_serial::DataBits::Six),
            7 => Some(tokio_serial::DataBits::Seven),
            8 => Some(tokio_serial::DataBits::Eight),
            _ => None,
        }
    }

    /// Map the configured stop bits, or `None` if out of range.
    pub fn stop_bits(&self) -> Option<tokio_serial::StopBits> {
        match self.stop_bits {
            1 => Some(tokio_serial::StopBits::One),
            2 => Some(tokio_serial::StopBits::Two),
            _ => None,
        }
    }
}

/// Reply timeouts per opcode class, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutTable {
    #[serde(default = "default_status_ms")]
    pub status_ms: u64,
    #[serde(default = "default_control_ms")]
    pub control_ms: u64,
    #[serde(default = "default_time_sync_ms")]
    pub time_sync_ms: u64,
    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: u64,
}

fn default_status_ms() -> u64 {
    DEFAULT_STATUS_TIMEOUT_MS
}

fn default_control_ms() -> u64 {
    DEFAULT_CONTROL_TIMEOUT_MS
}

fn default_time_sync_ms() -> u64 {
    DEFAULT_TIME_SYNC_TIMEOUT_MS
}

fn default_pulse_ms() -> u64 {
    DEFAULT_PULSE_TIMEOUT_MS
}

impl Default for TimeoutTable {
    fn default() -> Self {
        Self {
            status_ms: DEFAULT_STATUS_TIMEOUT_MS,
            control_ms: DEFAULT_CONTROL_TIMEOUT_MS,
            time_sync_ms: DEFAULT_TIME_SYNC_TIMEOUT_MS,
            pulse_ms: DEFAULT_PULSE_TIMEOUT_MS,
        }
    }
}

impl TimeoutTable {
    pub fn for_class(&self, class: OpcodeClass) -> Duration {
        let ms = match class {
            OpcodeClass::Status => self.status_ms,
            OpcodeClass::Control => self.control_ms,
            OpcodeClass::TimeSync => self.time_sync_ms,
            OpcodeClass::Pulse => self.pulse_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn for_opcode(&self, opcode: Opcode) -> Duration {
        self.for_class(opcode.class())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_serial_defaults() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.reopen_pause(), Duration::from_millis(500));
        assert_eq!(config.data_bits(), Some(tokio_serial::DataBits::Eight));
        assert_eq!(config.stop_bits(), Some(tokio_serial::StopBits::One));
    }

    #[test]
    fn test_serial_partial_toml() {
        let config: SerialConfig = toml::from_str(
            r#"
            port = "/dev/ttyS1"
            parity = "even"
            rts_control = false
            "#,
        )
        .unwrap();
        assert_eq!(config.port, "/dev/ttyS1");
        assert_eq!(config.parity, ParitySetting::Even);
        assert!(!config.rts_control);
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_serial_bad_framing() {
        let config = SerialConfig {
            data_bits: 9,
            stop_bits: 3,
            ..SerialConfig::default()
        };
        assert_eq!(config.data_bits(), None);
        assert_eq!(config.stop_bits(), None);
    }

    #[rstest]
    #[case(Opcode::Status, 2000)]
    #[case(Opcode::StatusNovelty, 2000)]
    #[case(Opcode::ContinueSequence, 1000)]
    #[case(Opcode::AckNovelty, 1000)]
    #[case(Opcode::SetTime, 3000)]
    #[case(Opcode::Pulse(5), 1000)]
    fn test_timeout_defaults(#[case] opcode: Opcode, #[case] ms: u64) {
        assert_eq!(
            TimeoutTable::default().for_opcode(opcode),
            Duration::from_millis(ms)
        );
    }

    #[test]
    fn test_timeout_override() {
        let table: TimeoutTable = toml::from_str("status_ms = 250").unwrap();
        assert_eq!(table.for_class(OpcodeClass::Status), Duration::from_millis(250));
        assert_eq!(table.for_class(OpcodeClass::TimeSync), Duration::from_millis(3000));
    }
}
