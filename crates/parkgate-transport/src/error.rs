//! Error types for link operations.

use std::time::Duration;

/// Result type alias for link operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while exchanging frames on the bus.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No complete reply arrived within the exchange timeout.
    #[error("No reply after {}ms", after.as_millis())]
    Timeout { after: Duration },

    /// The serial port could not be opened or has gone away.
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    /// Read or write failure on an open port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout { after }
    }

    pub fn port_unavailable(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortUnavailable {
            port: port.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error means the link itself is unusable.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::PortUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            TransportError::timeout(Duration::from_millis(2000)).to_string(),
            "No reply after 2000ms"
        );
        assert_eq!(
            TransportError::port_unavailable("/dev/ttyUSB0", "busy").to_string(),
            "Port /dev/ttyUSB0 unavailable: busy"
        );
    }

    #[test]
    fn test_is_link_failure() {
        assert!(TransportError::port_unavailable("p", "r").is_link_failure());
        assert!(!TransportError::timeout(Duration::ZERO).is_link_failure());
    }
}
