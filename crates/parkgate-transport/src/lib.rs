//! Half-duplex RS-485 transport for the module bus.
//!
//! This crate owns the physical link: it transmits encoded commands with the
//! RS-485 driver enabled, collects reply frames and bounds every exchange by
//! a timeout chosen per opcode class.
//!
//! # Link Implementations
//!
//! - [`SerialLink`]: a local serial port through `tokio-serial`
//! - [`MockLink`] (feature `mock`): scripted responses for tests and demos
//!
//! Consumers are generic over [`Link`]:
//!
//! ```no_run
//! use parkgate_core::ModuleAddress;
//! use parkgate_protocol::Command;
//! use parkgate_transport::{Link, SerialConfig, SerialLink, TimeoutTable};
//!
//! # async fn example() -> parkgate_transport::Result<()> {
//! let mut link = SerialLink::open(SerialConfig::default())?;
//! let timeouts = TimeoutTable::default();
//!
//! let command = Command::status(ModuleAddress::new(1).unwrap());
//! let reply = link.poll(&command, timeouts.for_opcode(command.opcode())).await?;
//! println!("{} bytes in {:?}", reply.bytes.len(), reply.elapsed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod serial;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{ParitySetting, SerialConfig, TimeoutTable};
pub use error::{Result, TransportError};
pub use link::{Link, RawReply};
pub use serial::SerialLink;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockLink, MockLinkHandle, MockResponse};
