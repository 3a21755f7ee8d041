//! Host-to-module commands.

use crate::error::CommandError;
use crate::frame::checksum_parts;
use crate::opcode::{FrameDirection, Opcode};
use bytes::Bytes;
use chrono::NaiveDateTime;
use parkgate_core::ModuleAddress;
use parkgate_core::constants::{MAX_OUTPUT, MAX_PULSE_MS, MIN_OUTPUT, TIMESTAMP_FORMAT};
use std::fmt;

/// A validated command addressed to one module.
///
/// Commands are immutable once built: the payload length is checked against
/// the opcode table and the checksum is computed at construction, so
/// [`encode`](crate::encode) cannot fail.
///
/// # Examples
///
/// ```
/// use parkgate_core::ModuleAddress;
/// use parkgate_protocol::{Command, Opcode};
///
/// let address = ModuleAddress::new(12).unwrap();
/// let pulse = Command::pulse(address, 2, 1500).unwrap();
/// assert_eq!(pulse.opcode(), Opcode::Pulse(2));
/// assert_eq!(pulse.payload(), b"1500");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    address: ModuleAddress,
    opcode: Opcode,
    payload: Bytes,
    checksum: u8,
}

impl Command {
    /// Build a command from raw parts.
    ///
    /// # Errors
    /// - `CommandError::NotARequest` if the opcode is reply-only (`S6`)
    /// - `CommandError::PayloadLength` if the payload does not match the table
    /// - `CommandError::PayloadNotNumeric` if the payload is not ASCII digits
    pub fn new(
        address: ModuleAddress,
        opcode: Opcode,
        payload: impl Into<Bytes>,
    ) -> Result<Self, CommandError> {
        let payload = payload.into();

        let expected = opcode
            .payload_len(FrameDirection::Request)
            .ok_or(CommandError::NotARequest { opcode })?;

        if payload.len() != expected {
            return Err(CommandError::PayloadLength {
                opcode,
                expected,
                actual: payload.len(),
            });
        }

        // Every request payload in the table is decimal.
        if !payload.iter().all(u8::is_ascii_digit) {
            return Err(CommandError::PayloadNotNumeric { opcode });
        }

        Ok(Self::from_parts(address, opcode, payload))
    }

    /// Build without validation. Callers guarantee the payload fits the table.
    pub(crate) fn from_parts(address: ModuleAddress, opcode: Opcode, payload: Bytes) -> Self {
        let checksum = checksum_parts(address, opcode, &payload);
        Self {
            address,
            opcode,
            payload,
            checksum,
        }
    }

    /// `S0` status read.
    pub fn status(address: ModuleAddress) -> Self {
        Self::from_parts(address, Opcode::Status, Bytes::new())
    }

    /// `T0` date/time synchronisation.
    pub fn set_time(address: ModuleAddress, at: NaiveDateTime) -> Self {
        let stamp = at.format(TIMESTAMP_FORMAT).to_string();
        Self::from_parts(address, Opcode::SetTime, Bytes::from(stamp))
    }

    /// `K1`: let the module continue its sequence (opens the barrier).
    pub fn continue_sequence(address: ModuleAddress) -> Self {
        Self::from_parts(address, Opcode::ContinueSequence, Bytes::new())
    }

    /// `K0`: abort the module's current sequence.
    pub fn stop_sequence(address: ModuleAddress) -> Self {
        Self::from_parts(address, Opcode::StopSequence, Bytes::new())
    }

    /// `O1`: the host has downloaded the pending novelty.
    pub fn ack_novelty(address: ModuleAddress) -> Self {
        Self::from_parts(address, Opcode::AckNovelty, Bytes::new())
    }

    /// `Pn`: pulse digital output `output` for `duration_ms`.
    ///
    /// # Errors
    /// - `CommandError::InvalidOutput` if `output` is not 1-8
    /// - `CommandError::PulseTooLong` if the duration needs more than 4 digits
    pub fn pulse(address: ModuleAddress, output: u8, duration_ms: u32) -> Result<Self, CommandError> {
        if !(MIN_OUTPUT..=MAX_OUTPUT).contains(&output) {
            return Err(CommandError::InvalidOutput(output));
        }
        if duration_ms > MAX_PULSE_MS {
            return Err(CommandError::PulseTooLong(duration_ms));
        }

        let payload = format!("{duration_ms:04}");
        Ok(Self::from_parts(address, Opcode::Pulse(output), Bytes::from(payload)))
    }

    pub fn address(&self) -> ModuleAddress {
        self.address
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Size of the encoded frame in bytes.
    pub fn encoded_len(&self) -> usize {
        parkgate_core::constants::FRAME_OVERHEAD + self.payload.len()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<STX>{}{}{}<ETX>{:02X}",
            self.address,
            self.opcode,
            String::from_utf8_lossy(&self.payload),
            self.checksum
        )
    }
}
