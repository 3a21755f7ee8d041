//! Tokio codec for reading frames off a byte stream.
//!
//! Serial reads deliver frames in arbitrary fragments, possibly preceded by
//! line noise. `BusCodec` buffers until a complete frame is available and
//! then hands it to [`decode`](crate::decode).
//!
//! # Framing strategy
//!
//! 1. Discard bytes until an STX is found
//! 2. Wait for the 5-byte header (STX, address, opcode)
//! 3. Resolve the payload length from the opcode table and wait for
//!    `header + payload + ETX + checksum` bytes
//! 4. For opcodes outside the table, fall back to scanning for ETX and
//!    taking the two checksum bytes after it
//!
//! Step 3 never scans for ETX, so status bytes that happen to equal 0x03 do
//! not truncate a reply. Step 4 exists so that an unknown opcode is consumed
//! and reported instead of stalling the stream.
//!
//! # Usage
//!
//! ```
//! use bytes::BytesMut;
//! use parkgate_protocol::{BusCodec, Opcode};
//! use tokio_util::codec::Decoder;
//!
//! let mut codec = BusCodec::replies();
//! let mut buffer = BytesMut::from(&b"noise\x0201S0"[..]);
//! assert!(codec.decode(&mut buffer).unwrap().is_none());
//!
//! buffer.extend_from_slice(b"\x00\x00\x03E9");
//! let frame = codec.decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(frame.opcode, Opcode::Status);
//! ```

use crate::command::Command;
use crate::error::FrameError;
use crate::frame::{ParsedFrame, decode, encode_into};
use crate::opcode::{FrameDirection, Opcode};
use bytes::{Buf, BytesMut};
use parkgate_core::constants::{
    CHECKSUM_LENGTH, ETX, FRAME_OVERHEAD, HEADER_LENGTH, MAX_PAYLOAD_LENGTH, STX,
};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Largest frame the codec will buffer before giving up on it.
const DEFAULT_MAX_FRAME_SIZE: usize = FRAME_OVERHEAD + MAX_PAYLOAD_LENGTH;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Streaming frame decoder and command encoder.
#[derive(Debug, Clone)]
pub struct BusCodec {
    direction: FrameDirection,
    max_frame_size: usize,
}

impl BusCodec {
    /// Codec for a given traffic direction.
    pub fn new(direction: FrameDirection) -> Self {
        Self {
            direction,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Codec for the host side: decodes module replies.
    pub fn replies() -> Self {
        Self::new(FrameDirection::Reply)
    }

    /// Codec for the module side: decodes host commands.
    pub fn requests() -> Self {
        Self::new(FrameDirection::Request)
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn direction(&self) -> FrameDirection {
        self.direction
    }

    /// Total frame length once the header is buffered, if it can be known.
    ///
    /// `None` means more bytes are needed to find the end.
    fn frame_len(&self, src: &[u8]) -> Option<usize> {
        let opcode = Opcode::from_bytes([src[3], src[4]]);
        if let Some(len) = opcode.and_then(|op| op.payload_len(self.direction)) {
            return Some(HEADER_LENGTH + len + 1 + CHECKSUM_LENGTH);
        }

        src[HEADER_LENGTH..]
            .iter()
            .position(|&b| b == ETX)
            .map(|pos| HEADER_LENGTH + pos + 1 + CHECKSUM_LENGTH)
    }
}

impl Default for BusCodec {
    fn default() -> Self {
        Self::replies()
    }
}

impl BusCodec {
    /// Split the next complete frame off `src` without decoding it.
    ///
    /// Leading noise is discarded. Returns `Ok(None)` when more bytes are
    /// needed. On error the offending STX is skipped so the next call
    /// resynchronises on the following one.
    ///
    /// # Errors
    /// Returns `FrameError::MalformedFrame` if the frame would exceed
    /// [`max_frame_size`](Self::max_frame_size).
    pub fn split_frame(&self, src: &mut BytesMut) -> Result<Option<BytesMut>, FrameError> {
        match src.iter().position(|&b| b == STX) {
            Some(0) => {}
            Some(start) => src.advance(start),
            None => {
                src.clear();
                return Ok(None);
            }
        }

        if src.len() < HEADER_LENGTH {
            return Ok(None);
        }

        let Some(frame_len) = self.frame_len(src) else {
            if src.len() > self.max_frame_size {
                src.advance(1);
                return Err(FrameError::malformed(format!(
                    "no ETX within {} bytes",
                    self.max_frame_size
                )));
            }
            return Ok(None);
        };

        if frame_len > self.max_frame_size {
            src.advance(1);
            return Err(FrameError::malformed(format!(
                "frame of {frame_len} bytes exceeds limit of {}",
                self.max_frame_size
            )));
        }

        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(frame_len)))
    }
}

impl Decoder for BusCodec {
    type Item = ParsedFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.split_frame(src)? {
            Some(bytes) => Ok(Some(decode(&bytes, self.direction)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<&Command> for BusCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use parkgate_core::ModuleAddress;

    fn addr(n: u8) -> ModuleAddress {
        ModuleAddress::new(n).unwrap()
    }

    #[test]
    fn test_codec_defaults() {
        let codec = BusCodec::default();
        assert_eq!(codec.direction(), FrameDirection::Reply);
        assert_eq!(codec.max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_decode_fragmented_reply() {
        let mut codec = BusCodec::replies();
        let frame = encode_frame(addr(7), Opcode::Status, &[0x01, 0x02]);
        let mut buffer = BytesMut::new();

        for chunk in frame.chunks(3) {
            assert!(codec.decode(&mut buffer).unwrap().is_none());
            buffer.extend_from_slice(chunk);
        }

        let parsed = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(parsed.address, addr(7));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_status_byte_equal_to_etx() {
        let mut codec = BusCodec::replies();
        let frame = encode_frame(addr(1), Opcode::Status, &[ETX, ETX]);
        let mut buffer = BytesMut::from(&frame[..]);

        let parsed = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&parsed.payload[..], &[ETX, ETX]);
    }

    #[test]
    fn test_decode_skips_garbage() {
        let mut codec = BusCodec::replies();
        let mut buffer = BytesMut::from(&b"\xFF\x00zz"[..]);
        buffer.extend_from_slice(&encode_frame(addr(2), Opcode::ContinueSequence, &[]));

        let parsed = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(parsed.opcode, Opcode::ContinueSequence);
    }

    #[test]
    fn test_decode_garbage_only_is_discarded() {
        let mut codec = BusCodec::replies();
        let mut buffer = BytesMut::from(&b"line noise"[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_two_frames_in_buffer() {
        let mut codec = BusCodec::replies();
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&encode_frame(addr(1), Opcode::Status, &[0, 0]));
        buffer.extend_from_slice(&encode_frame(addr(2), Opcode::AckNovelty, &[]));

        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().address, addr(1));
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().address, addr(2));
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_decode_unknown_opcode_is_consumed() {
        let mut codec = BusCodec::replies();
        let mut buffer = BytesMut::from(&b"\x0201ZZ\x0300"[..]);
        buffer.extend_from_slice(&encode_frame(addr(1), Opcode::Status, &[0, 0]));

        assert!(matches!(
            codec.decode(&mut buffer),
            Err(CodecError::Frame(_))
        ));
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().opcode, Opcode::Status);
    }

    #[test]
    fn test_decode_unterminated_frame_too_large() {
        let mut codec = BusCodec::replies().with_max_frame_size(16);
        let mut buffer = BytesMut::from(&b"\x0201ZZ"[..]);
        buffer.extend_from_slice(&[b'A'; 32]);

        assert!(codec.decode(&mut buffer).is_err());
        // The rest has no STX and is dropped on the next call.
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_corrupt_checksum() {
        let mut codec = BusCodec::replies();
        let mut buffer = BytesMut::from(&b"\x0201S0\x00\x00\x0300"[..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(CodecError::Frame(FrameError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn test_split_frame_keeps_remainder() {
        let codec = BusCodec::replies();
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&encode_frame(addr(1), Opcode::Status, &[0, 0]));
        buffer.extend_from_slice(b"\x0202");

        let frame = codec.split_frame(&mut buffer).unwrap().unwrap();
        assert_eq!(frame.len(), 10);
        assert_eq!(&buffer[..], b"\x0202");
        assert!(codec.split_frame(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_encode_command() {
        let mut codec = BusCodec::replies();
        let mut buffer = BytesMut::new();
        codec.encode(&Command::status(addr(1)), &mut buffer).unwrap();
        codec.encode(&Command::ack_novelty(addr(1)), &mut buffer).unwrap();
        assert!(buffer.starts_with(b"\x0201S0\x03E9"));
        assert_eq!(buffer.len(), 16);
    }

    #[test]
    fn test_requests_codec_decodes_commands() {
        let mut codec = BusCodec::requests();
        let mut buffer = BytesMut::new();
        let command = Command::pulse(addr(3), 1, 250).unwrap();
        codec.encode(&command, &mut buffer).unwrap();

        let parsed = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(parsed.into_command().unwrap(), command);
    }
}
