use crate::opcode::Opcode;
use thiserror::Error;

/// Errors produced while decoding bytes received from the bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Framing markers, length, address or opcode are not what the table allows.
    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },

    /// The trailing checksum does not match the recomputed one.
    #[error("Checksum mismatch: expected {expected:02X}, got {actual:?}")]
    ChecksumMismatch { expected: u8, actual: String },
}

impl FrameError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }
}

/// Errors produced while building a [`Command`](crate::Command).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Opcode {opcode} cannot be sent to a module")]
    NotARequest { opcode: Opcode },

    #[error("Opcode {opcode} expects a {expected}-byte payload, got {actual}")]
    PayloadLength {
        opcode: Opcode,
        expected: usize,
        actual: usize,
    },

    #[error("Payload for {opcode} must be ASCII digits")]
    PayloadNotNumeric { opcode: Opcode },

    #[error("Output {0} out of range (1-8)")]
    InvalidOutput(u8),

    #[error("Pulse duration {0}ms exceeds 9999ms")]
    PulseTooLong(u32),
}
