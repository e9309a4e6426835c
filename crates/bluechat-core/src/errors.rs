//! Error types for BlueChat
//!
//! Failures inside the transport core are caught where they happen and turned
//! into observable results; these types carry them between layers until then.

use crate::connection::CONNECTION_INTERRUPTED;
use crate::permission::Capability;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures of an established or establishing RFCOMM channel
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Read, write or handshake failed; the session should be considered broken
    #[error("{}", CONNECTION_INTERRUPTED)]
    Interrupted {
        #[source]
        source: std::io::Error,
    },
    #[error("Socket is not connected")]
    NotConnected,
    #[error("Service {service} is already being listened on")]
    ServiceBusy { service: String },
}

impl TransportError {
    pub fn interrupted(source: std::io::Error) -> Self {
        TransportError::Interrupted { source }
    }
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Top-level error for BlueChat components
#[derive(Debug, thiserror::Error)]
pub enum BluechatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Permission denied: {capability:?}")]
    PermissionDenied { capability: Capability },

    #[error("Bluetooth adapter not available")]
    AdapterUnavailable,

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

impl BluechatError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        BluechatError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn backend(reason: impl std::fmt::Display) -> Self {
        BluechatError::Backend(reason.to_string())
    }
}

/// Result type alias for BlueChat operations
pub type BluechatResult<T> = core::result::Result<T, BluechatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_message_is_user_facing() {
        let err = TransportError::interrupted(std::io::Error::other("reset by peer"));
        assert_eq!(err.to_string(), CONNECTION_INTERRUPTED);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_transport_error_wraps() {
        let err: BluechatError = TransportError::NotConnected.into();
        assert_eq!(err.to_string(), "Transport error: Socket is not connected");
    }
}
