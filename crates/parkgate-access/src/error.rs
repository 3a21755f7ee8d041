//! Error types for access validation.

/// Result type alias for store and validator operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Failures of the persistence collaborator.
///
/// A credential that is merely refused is not an error: it is reported as
/// [`AccessResult::Denied`](crate::AccessResult::Denied).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("Credential store error: {0}")]
    Store(String),
}

impl AccessError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}
