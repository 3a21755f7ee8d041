use thiserror::Error;

/// Errors raised while building the shared value types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid module address {value}: must be {min}-{max}")]
    InvalidAddress { value: u32, min: u8, max: u8 },

    #[error("Invalid module address '{0}'")]
    UnparsableAddress(String),

    #[error("Invalid identification: {0}")]
    InvalidIdentification(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
