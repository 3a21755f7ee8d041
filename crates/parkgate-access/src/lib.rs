//! Credential validation and ticket sequence tracking.
//!
//! - [`AccessValidator`]: decides whether a presented identification may
//!   pass a module (validity, antipassback, minimum dwell) and records the
//!   movement when it may
//! - [`SequenceMachine`]: follows a parking ticket through a module from
//!   grant to withdrawal
//! - [`CredentialStore`]: the persistence contract, with [`MemoryStore`] as
//!   the in-process implementation
//!
//! Nothing here talks to the bus. The polling scheduler feeds decoded
//! replies in and turns the results into commands.

pub mod error;
pub mod result;
pub mod sequence;
pub mod store;
pub mod validator;

pub use error::{AccessError, Result};
pub use result::{AccessResult, DenyReason};
pub use sequence::{
    SequenceConfig, SequenceEvent, SequenceMachine, SequenceState, SequenceTransition,
    SequenceViolation,
};
pub use store::{Credential, CredentialStore, MemoryStore, Movement, MovementId, NewMovement};
pub use validator::{
    AccessDecision, AccessPoint, AccessValidator, ValidationContext, ValidatorConfig, decide,
};
