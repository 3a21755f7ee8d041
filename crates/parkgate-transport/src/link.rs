//! The half-duplex link abstraction.
//!
//! All methods take `&mut self`: a link carries one exchange at a time and is
//! owned by exactly one caller, so two modules can never be addressed
//! concurrently.
//!
//! The trait uses native `async fn` (Edition 2024 RPITIT) and is therefore
//! not object-safe. Consumers are generic over `L: Link`.

#![allow(async_fn_in_trait)]

use crate::error::Result;
use bytes::Bytes;
use parkgate_protocol::Command;
use std::time::Duration;

/// Bytes of one complete reply frame, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub bytes: Bytes,
    /// Time from start of transmission to the last reply byte.
    pub elapsed: Duration,
}

impl RawReply {
    pub fn new(bytes: impl Into<Bytes>, elapsed: Duration) -> Self {
        Self {
            bytes: bytes.into(),
            elapsed,
        }
    }
}

/// Half-duplex request/reply link to the module bus.
///
/// # Examples
///
/// ```no_run
/// use parkgate_core::ModuleAddress;
/// use parkgate_protocol::{Command, decode_reply};
/// use parkgate_transport::{Link, Result};
/// use std::time::Duration;
///
/// async fn read_status<L: Link>(link: &mut L) -> Result<()> {
///     let address = ModuleAddress::new(1).unwrap();
///     let reply = link.poll(&Command::status(address), Duration::from_secs(2)).await?;
///     let frame = decode_reply(&reply.bytes);
///     println!("{frame:?}");
///     Ok(())
/// }
/// ```
pub trait Link {
    /// Transmit `command` and wait for one reply frame.
    ///
    /// # Errors
    /// - `TransportError::Timeout` if no complete frame arrives in `timeout`
    /// - `TransportError::PortUnavailable` if the port is closed
    /// - `TransportError::Io` on read or write failure
    async fn poll(&mut self, command: &Command, timeout: Duration) -> Result<RawReply>;

    /// Transmit `command` without waiting for a reply.
    async fn send_only(&mut self, command: &Command) -> Result<()>;

    /// Close and reopen the underlying port.
    ///
    /// # Errors
    /// Returns `TransportError::PortUnavailable` if the port cannot be opened.
    async fn reopen(&mut self) -> Result<()>;
}
