//! Wire protocol for the RS-485 module bus.
//!
//! Frames are built from a [`Command`] with [`encode`] and parsed back with
//! [`decode`]. The payload size of every opcode is fixed by a single table
//! ([`Opcode::payload_len`]), which both the decoder and the streaming
//! [`BusCodec`] rely on to locate the end of a frame.
//!
//! ```
//! use parkgate_core::ModuleAddress;
//! use parkgate_protocol::{Command, decode_command, encode};
//!
//! let address = ModuleAddress::new(1).unwrap();
//! let bytes = encode(&Command::status(address));
//! assert_eq!(&bytes[..], b"\x0201S0\x03E9");
//!
//! let parsed = decode_command(&bytes).unwrap();
//! assert_eq!(parsed.into_command().unwrap(), Command::status(address));
//! ```

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod opcode;
pub mod status;

pub use codec::{BusCodec, CodecError};
pub use command::Command;
pub use error::{CommandError, FrameError};
pub use frame::{
    ParsedFrame, checksum, decode, decode_command, decode_reply, encode, encode_frame,
};
pub use opcode::{FrameDirection, Opcode, OpcodeClass};
pub use status::{BarrierPosition, Novelty, Reply, StatusReport};
