//! Opcodes and the payload length table.
//!
//! Every opcode has a fixed payload size per direction. The table below is
//! the only place frame lengths are defined; decoders never infer a length
//! by scanning for ETX when the opcode is known.
//!
//! | Opcode | Meaning                       | Request | Reply |
//! |--------|-------------------------------|---------|-------|
//! | `S0`   | Read status                   | 0       | 2     |
//! | `S6`   | Status with pending novelty   | -       | 22    |
//! | `T0`   | Set date/time `YYMMDDHHMMSS`  | 12      | 0     |
//! | `K1`   | Continue sequence (open)      | 0       | 0     |
//! | `K0`   | Stop sequence                 | 0       | 0     |
//! | `O1`   | Novelty downloaded (ack)      | 0       | 0     |
//! | `P1`-`P8` | Pulse output n, 4-digit ms | 4       | 0     |
//!
//! `S6` is only ever sent by modules: it answers an `S0` request when a
//! credential is waiting in the module buffer. Its payload is the two status
//! bytes, an 8-character identification and a `YYMMDDHHMMSS` timestamp.

use parkgate_core::constants::{
    MAX_OUTPUT, MIN_OUTPUT, NOVELTY_IDENTIFICATION_LENGTH, TIMESTAMP_LENGTH,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the status block at the start of `S0`/`S6` replies.
pub const STATUS_BLOCK_LENGTH: usize = 2;

/// Length of the pulse duration payload.
pub const PULSE_PAYLOAD_LENGTH: usize = 4;

/// Which side of the bus produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDirection {
    /// Host to module.
    Request,
    /// Module to host.
    Reply,
}

/// Timeout class of an opcode, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpcodeClass {
    Status,
    Control,
    TimeSync,
    Pulse,
}

/// Two-character operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// `S0`
    Status,
    /// `S6`
    StatusNovelty,
    /// `T0`
    SetTime,
    /// `K1`
    ContinueSequence,
    /// `K0`
    StopSequence,
    /// `O1`
    AckNovelty,
    /// `P1`..`P8`
    Pulse(u8),
}

impl Opcode {
    /// Resolve the two opcode bytes of a frame header.
    ///
    /// Returns `None` for anything outside the table, including `P0` and `P9`.
    pub fn from_bytes(bytes: [u8; 2]) -> Option<Self> {
        match &bytes {
            b"S0" => Some(Opcode::Status),
            b"S6" => Some(Opcode::StatusNovelty),
            b"T0" => Some(Opcode::SetTime),
            b"K1" => Some(Opcode::ContinueSequence),
            b"K0" => Some(Opcode::StopSequence),
            b"O1" => Some(Opcode::AckNovelty),
            [b'P', n] if n.is_ascii_digit() => {
                let output = n - b'0';
                (MIN_OUTPUT..=MAX_OUTPUT)
                    .contains(&output)
                    .then_some(Opcode::Pulse(output))
            }
            _ => None,
        }
    }

    /// Wire representation.
    pub fn as_bytes(&self) -> [u8; 2] {
        match self {
            Opcode::Status => *b"S0",
            Opcode::StatusNovelty => *b"S6",
            Opcode::SetTime => *b"T0",
            Opcode::ContinueSequence => *b"K1",
            Opcode::StopSequence => *b"K0",
            Opcode::AckNovelty => *b"O1",
            Opcode::Pulse(n) => [b'P', b'0' + n],
        }
    }

    /// Payload size for this opcode in the given direction.
    ///
    /// `None` means the opcode never travels in that direction.
    pub fn payload_len(&self, direction: FrameDirection) -> Option<usize> {
        use FrameDirection::{Reply, Request};

        match (self, direction) {
            (Opcode::Status, Request) => Some(0),
            (Opcode::Status, Reply) => Some(STATUS_BLOCK_LENGTH),
            (Opcode::StatusNovelty, Request) => None,
            (Opcode::StatusNovelty, Reply) => {
                Some(STATUS_BLOCK_LENGTH + NOVELTY_IDENTIFICATION_LENGTH + TIMESTAMP_LENGTH)
            }
            (Opcode::SetTime, Request) => Some(TIMESTAMP_LENGTH),
            (Opcode::Pulse(_), Request) => Some(PULSE_PAYLOAD_LENGTH),
            (
                Opcode::ContinueSequence | Opcode::StopSequence | Opcode::AckNovelty,
                Request,
            ) => Some(0),
            (
                Opcode::SetTime
                | Opcode::ContinueSequence
                | Opcode::StopSequence
                | Opcode::AckNovelty
                | Opcode::Pulse(_),
                Reply,
            ) => Some(0),
        }
    }

    pub fn class(&self) -> OpcodeClass {
        match self {
            Opcode::Status | Opcode::StatusNovelty => OpcodeClass::Status,
            Opcode::SetTime => OpcodeClass::TimeSync,
            Opcode::ContinueSequence | Opcode::StopSequence | Opcode::AckNovelty => {
                OpcodeClass::Control
            }
            Opcode::Pulse(_) => OpcodeClass::Pulse,
        }
    }

    /// Whether a reply carrying `reply` is a valid answer to this request.
    ///
    /// Status reads may be answered with a plain status or a novelty; every
    /// other opcode is echoed.
    pub fn accepts_reply(&self, reply: Opcode) -> bool {
        match self {
            Opcode::Status => matches!(reply, Opcode::Status | Opcode::StatusNovelty),
            other => *other == reply,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b] = self.as_bytes();
        write!(f, "{}{}", a as char, b as char)
    }
}
