//! Decoding of module replies into typed reports.
//!
//! # Status block
//!
//! Every `S0`/`S6` reply starts with two status bytes:
//!
//! | Byte | Bit | Meaning                    |
//! |------|-----|----------------------------|
//! | 0    | 0   | barrier open               |
//! | 0    | 1   | vehicle loop occupied      |
//! | 0    | 2   | ticket at slot             |
//! | 0    | 7   | novelty pending            |
//! | 1    | -   | digital input bitmap       |

use crate::error::FrameError;
use crate::frame::ParsedFrame;
use crate::opcode::{FrameDirection, Opcode, STATUS_BLOCK_LENGTH};
use chrono::NaiveDateTime;
use parkgate_core::Identification;
use parkgate_core::constants::{NOVELTY_IDENTIFICATION_LENGTH, TIMESTAMP_FORMAT};
use serde::Serialize;

const FLAG_BARRIER_OPEN: u8 = 0b0000_0001;
const FLAG_LOOP_OCCUPIED: u8 = 0b0000_0010;
const FLAG_TICKET_AT_SLOT: u8 = 0b0000_0100;
const FLAG_NOVELTY_PENDING: u8 = 0b1000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierPosition {
    #[default]
    Closed,
    Open,
}

/// Snapshot of a module's sensors as reported in the status block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct StatusReport {
    pub barrier: BarrierPosition,
    pub loop_occupied: bool,
    pub ticket_at_slot: bool,
    pub novelty_pending: bool,
    /// Raw digital input bitmap (byte 1).
    pub inputs: u8,
}

impl StatusReport {
    /// Parse the leading status block of a reply payload.
    ///
    /// Bytes past the block are ignored.
    ///
    /// # Errors
    /// Returns `FrameError::MalformedFrame` if fewer than two bytes are given.
    pub fn parse(block: &[u8]) -> Result<Self, FrameError> {
        let [flags, inputs, ..] = *block else {
            return Err(FrameError::malformed(format!(
                "status block needs {STATUS_BLOCK_LENGTH} bytes, got {}",
                block.len()
            )));
        };

        let barrier = if flags & FLAG_BARRIER_OPEN != 0 {
            BarrierPosition::Open
        } else {
            BarrierPosition::Closed
        };

        Ok(Self {
            barrier,
            loop_occupied: flags & FLAG_LOOP_OCCUPIED != 0,
            ticket_at_slot: flags & FLAG_TICKET_AT_SLOT != 0,
            novelty_pending: flags & FLAG_NOVELTY_PENDING != 0,
            inputs,
        })
    }

    /// Encode back into the two status bytes. Used by test doubles.
    pub fn to_bytes(&self) -> [u8; STATUS_BLOCK_LENGTH] {
        let mut flags = 0;
        if self.barrier == BarrierPosition::Open {
            flags |= FLAG_BARRIER_OPEN;
        }
        if self.loop_occupied {
            flags |= FLAG_LOOP_OCCUPIED;
        }
        if self.ticket_at_slot {
            flags |= FLAG_TICKET_AT_SLOT;
        }
        if self.novelty_pending {
            flags |= FLAG_NOVELTY_PENDING;
        }
        [flags, self.inputs]
    }
}

/// A credential the module read and holds in its buffer (`S6`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Novelty {
    pub status: StatusReport,
    pub identification: Identification,
    /// Module clock at presentation. `None` if the module sent an
    /// unparsable stamp (typically an unsynchronised clock).
    pub presented_at: Option<NaiveDateTime>,
}

impl Novelty {
    /// Parse a full `S6` payload.
    ///
    /// # Errors
    /// Returns `FrameError::MalformedFrame` if the payload is shorter than
    /// the status block plus identification, or the identification field is
    /// blank or not alphanumeric.
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        let status = StatusReport::parse(payload)?;

        let id_end = STATUS_BLOCK_LENGTH + NOVELTY_IDENTIFICATION_LENGTH;
        let id_field = payload
            .get(STATUS_BLOCK_LENGTH..id_end)
            .ok_or_else(|| FrameError::malformed("novelty payload truncated"))?;

        let id_text = std::str::from_utf8(id_field)
            .map_err(|_| FrameError::malformed("novelty identification is not ASCII"))?;
        let identification = Identification::new(id_text)
            .map_err(|e| FrameError::malformed(format!("novelty identification: {e}")))?;

        let presented_at = payload
            .get(id_end..)
            .and_then(|stamp| std::str::from_utf8(stamp).ok())
            .and_then(|stamp| NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok());

        Ok(Self {
            status,
            identification,
            presented_at,
        })
    }
}

/// Typed view of a decoded reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Reply {
    Status(StatusReport),
    Novelty(Novelty),
    /// Echo of a control, time sync or pulse command.
    Ack(Opcode),
}

impl Reply {
    /// Interpret a frame decoded in the reply direction.
    ///
    /// # Errors
    /// Returns `FrameError::MalformedFrame` if the frame was decoded as a
    /// request or its payload does not parse.
    pub fn from_frame(frame: &ParsedFrame) -> Result<Self, FrameError> {
        if frame.direction != FrameDirection::Reply {
            return Err(FrameError::malformed("frame was decoded as a request"));
        }

        match frame.opcode {
            Opcode::Status => StatusReport::parse(&frame.payload).map(Reply::Status),
            Opcode::StatusNovelty => Novelty::parse(&frame.payload).map(Reply::Novelty),
            other => Ok(Reply::Ack(other)),
        }
    }

    /// Status block carried by the reply, if any.
    pub fn status(&self) -> Option<&StatusReport> {
        match self {
            Reply::Status(status) => Some(status),
            Reply::Novelty(novelty) => Some(&novelty.status),
            Reply::Ack(_) => None,
        }
    }
}
