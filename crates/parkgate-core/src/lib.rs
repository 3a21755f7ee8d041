//! Shared vocabulary for the parkgate bus controller.
//!
//! Every other crate in the workspace speaks in terms of the types defined
//! here: bus addresses, module and group identifiers, presented
//! identifications and movement directions. Nothing in this crate performs
//! I/O.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{CoreError, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
