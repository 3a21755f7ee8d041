//! Protocol-level constants for the RS-485 module bus.
//!
//! # Frame Structure
//!
//! ```text
//! <STX> ADDR(2) OPCODE(2) [PAYLOAD] <ETX> CHECKSUM(2)
//! ```
//!
//! Where:
//! - `<STX>` - Start of text marker (0x02)
//! - `ADDR` - Module address as two ASCII digits (`01`-`99`)
//! - `OPCODE` - Two ASCII characters (`S0`, `K1`, `P3`, ...)
//! - `PAYLOAD` - Opcode dependent, may be empty
//! - `<ETX>` - End of text marker (0x03)
//! - `CHECKSUM` - Sum of STX..=ETX modulo 256, as two hex digits
//!
//! # Usage
//!
//! ```
//! use parkgate_core::constants::*;
//!
//! assert_eq!(FRAME_OVERHEAD, 8);
//! assert!(MIN_ADDRESS <= MAX_ADDRESS);
//! ```

// ============================================================================
// Message Framing
// ============================================================================

/// Start of text marker.
pub const STX: u8 = 0x02;

/// End of text marker.
pub const ETX: u8 = 0x03;

/// Length of the address field in a frame.
pub const ADDRESS_LENGTH: usize = 2;

/// Length of the opcode field in a frame.
pub const OPCODE_LENGTH: usize = 2;

/// Length of the trailing checksum field in a frame.
pub const CHECKSUM_LENGTH: usize = 2;

/// Bytes preceding the payload: STX + address + opcode.
pub const HEADER_LENGTH: usize = 1 + ADDRESS_LENGTH + OPCODE_LENGTH;

/// Total size of a frame with an empty payload.
pub const FRAME_OVERHEAD: usize = HEADER_LENGTH + 1 + CHECKSUM_LENGTH;

/// Upper bound on any payload defined by the opcode table.
pub const MAX_PAYLOAD_LENGTH: usize = 64;

// ============================================================================
// Module Addressing
// ============================================================================

pub const MIN_ADDRESS: u8 = 1;

pub const MAX_ADDRESS: u8 = 99;

// ============================================================================
// Identification Format Constraints
// ============================================================================

pub const MIN_IDENTIFICATION_LENGTH: usize = 1;

pub const MAX_IDENTIFICATION_LENGTH: usize = 20;

/// Width of the identification field inside an `S6` novelty reply.
pub const NOVELTY_IDENTIFICATION_LENGTH: usize = 8;

/// Width of a `YYMMDDHHMMSS` timestamp field.
pub const TIMESTAMP_LENGTH: usize = 12;

/// `strftime` pattern of the `YYMMDDHHMMSS` wire timestamp.
pub const TIMESTAMP_FORMAT: &str = "%y%m%d%H%M%S";

// ============================================================================
// Output Control
// ============================================================================

/// Digital outputs are numbered 1-8.
pub const MIN_OUTPUT: u8 = 1;

pub const MAX_OUTPUT: u8 = 8;

/// Pulse durations travel as four decimal digits (milliseconds).
pub const MAX_PULSE_MS: u32 = 9999;

/// Pulse duration applied when a module has none configured.
pub const DEFAULT_PULSE_MS: u32 = 1000;

// ============================================================================
// Timeout Configuration (milliseconds)
// ============================================================================

pub const DEFAULT_STATUS_TIMEOUT_MS: u64 = 2000;

pub const DEFAULT_CONTROL_TIMEOUT_MS: u64 = 1000;

pub const DEFAULT_TIME_SYNC_TIMEOUT_MS: u64 = 3000;

pub const DEFAULT_PULSE_TIMEOUT_MS: u64 = 1000;

// ============================================================================
// Polling Defaults
// ============================================================================

pub const DEFAULT_INTER_MODULE_PAUSE_MS: u64 = 100;

/// Consecutive failures after which a module is considered offline.
pub const DEFAULT_OFFLINE_THRESHOLD: u32 = 3;

/// Consecutive failures across the whole bus that trigger a link reopen.
pub const DEFAULT_REOPEN_THRESHOLD: u32 = 10;

pub const DEFAULT_MAX_PENDING: usize = 8;

pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// Time a granted ticket sequence waits for the ticket to seat.
pub const DEFAULT_PRESENTED_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_MIN_DWELL_SECS: u64 = 60;
