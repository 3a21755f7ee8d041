//! Byte-level framing: checksum, encode and decode.
//!
//! # Wire Format
//!
//! ```text
//! 0x02 | addr "01".."99" | opcode | payload | 0x03 | checksum (2 hex chars)
//! ```
//!
//! The checksum is the sum modulo 256 of every byte from STX through ETX
//! inclusive. Encoders emit upper-case hex; decoders accept either case.
//!
//! Decoding is total. Arbitrary input yields either a [`ParsedFrame`] or a
//! [`FrameError`], and the checksum is verified before any field is
//! interpreted, so a corrupted payload byte always surfaces as
//! [`FrameError::ChecksumMismatch`].

use crate::command::Command;
use crate::error::{CommandError, FrameError};
use crate::opcode::{FrameDirection, Opcode};
use bytes::{BufMut, Bytes, BytesMut};
use parkgate_core::ModuleAddress;
use parkgate_core::constants::{CHECKSUM_LENGTH, ETX, FRAME_OVERHEAD, HEADER_LENGTH, STX};

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// A structurally valid frame, read from the bus or from a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub address: ModuleAddress,
    pub opcode: Opcode,
    pub payload: Bytes,
    pub direction: FrameDirection,
}

impl ParsedFrame {
    /// Rebuild the [`Command`] a request frame carries.
    ///
    /// # Errors
    /// Returns the [`CommandError`] that [`Command::new`] would raise for
    /// these parts, e.g. `NotARequest` for a decoded `S6` reply.
    pub fn into_command(self) -> Result<Command, CommandError> {
        Command::new(self.address, self.opcode, self.payload)
    }
}

/// Sum modulo 256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Checksum of the frame that `address`, `opcode` and `payload` encode to.
pub(crate) fn checksum_parts(address: ModuleAddress, opcode: Opcode, payload: &[u8]) -> u8 {
    let head = checksum(&[STX, ETX]);
    let addr = checksum(&address.to_ascii());
    let op = checksum(&opcode.as_bytes());
    head.wrapping_add(addr)
        .wrapping_add(op)
        .wrapping_add(checksum(payload))
}

/// Encode a command for transmission.
pub fn encode(command: &Command) -> Bytes {
    let mut buf = BytesMut::with_capacity(command.encoded_len());
    encode_into(command, &mut buf);
    buf.freeze()
}

/// Append the encoded command to `dst`.
pub fn encode_into(command: &Command, dst: &mut BytesMut) {
    put_frame(command.address(), command.opcode(), command.payload(), dst);
}

/// Encode a frame from raw parts without consulting the length table.
///
/// Used to produce module replies (emulators, test doubles). The resulting
/// frame only decodes if the parts agree with the table.
pub fn encode_frame(address: ModuleAddress, opcode: Opcode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
    put_frame(address, opcode, payload, &mut buf);
    buf.freeze()
}

fn put_frame(address: ModuleAddress, opcode: Opcode, payload: &[u8], dst: &mut BytesMut) {
    let start = dst.len();
    dst.reserve(FRAME_OVERHEAD + payload.len());
    dst.put_u8(STX);
    dst.put_slice(&address.to_ascii());
    dst.put_slice(&opcode.as_bytes());
    dst.put_slice(payload);
    dst.put_u8(ETX);

    let sum = checksum(&dst[start..]);
    dst.put_u8(HEX_DIGITS[usize::from(sum >> 4)]);
    dst.put_u8(HEX_DIGITS[usize::from(sum & 0x0F)]);
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

fn parse_checksum(field: &[u8]) -> Option<u8> {
    match field {
        [hi, lo] => Some(hex_value(*hi)? << 4 | hex_value(*lo)?),
        _ => None,
    }
}

/// Decode one complete frame.
///
/// `bytes` must hold exactly one frame: the ETX position is derived from
/// the total length and then checked against the opcode's payload length.
///
/// # Errors
/// - `FrameError::MalformedFrame` for a short buffer, missing STX, ETX not
///   where the length puts it, non-digit address, unknown opcode, an opcode
///   that never travels in `direction`, or a payload length that disagrees
///   with the table
/// - `FrameError::ChecksumMismatch` when the trailing checksum is not the
///   hex rendering of the recomputed sum
pub fn decode(bytes: &[u8], direction: FrameDirection) -> Result<ParsedFrame, FrameError> {
    if bytes.len() < FRAME_OVERHEAD {
        return Err(FrameError::malformed(format!(
            "frame too short: {} bytes, need at least {FRAME_OVERHEAD}",
            bytes.len()
        )));
    }

    if bytes[0] != STX {
        return Err(FrameError::malformed(format!(
            "expected STX, got 0x{:02X}",
            bytes[0]
        )));
    }

    let etx_pos = bytes.len() - CHECKSUM_LENGTH - 1;
    if bytes[etx_pos] != ETX {
        return Err(FrameError::malformed(format!(
            "expected ETX at offset {etx_pos}, got 0x{:02X}",
            bytes[etx_pos]
        )));
    }

    let expected = checksum(&bytes[..=etx_pos]);
    let field = &bytes[etx_pos + 1..];
    if parse_checksum(field) != Some(expected) {
        return Err(FrameError::ChecksumMismatch {
            expected,
            actual: String::from_utf8_lossy(field).into_owned(),
        });
    }

    let address = ModuleAddress::from_ascii([bytes[1], bytes[2]])
        .map_err(|e| FrameError::malformed(e.to_string()))?;

    let opcode = Opcode::from_bytes([bytes[3], bytes[4]]).ok_or_else(|| {
        FrameError::malformed(format!(
            "unknown opcode {:?}",
            String::from_utf8_lossy(&bytes[3..HEADER_LENGTH])
        ))
    })?;

    let expected_len = opcode.payload_len(direction).ok_or_else(|| {
        FrameError::malformed(format!("opcode {opcode} is not valid in a {direction:?}"))
    })?;

    let payload = &bytes[HEADER_LENGTH..etx_pos];
    if payload.len() != expected_len {
        return Err(FrameError::malformed(format!(
            "opcode {opcode} carries {expected_len} payload bytes, got {}",
            payload.len()
        )));
    }

    if direction == FrameDirection::Request && !payload.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::malformed(format!(
            "request payload for {opcode} is not numeric"
        )));
    }

    Ok(ParsedFrame {
        address,
        opcode,
        payload: Bytes::copy_from_slice(payload),
        direction,
    })
}

/// Decode a host-to-module frame.
pub fn decode_command(bytes: &[u8]) -> Result<ParsedFrame, FrameError> {
    decode(bytes, FrameDirection::Request)
}

/// Decode a module-to-host frame.
pub fn decode_reply(bytes: &[u8]) -> Result<ParsedFrame, FrameError> {
    decode(bytes, FrameDirection::Reply)
}
