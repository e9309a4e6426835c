//! Connection lifecycle types shared by every transport backend

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::types::Message;

// ----------------------------------------------------------------------------
// Notification Texts
// ----------------------------------------------------------------------------

/// Reported when a connection sequence starts without connect permission
pub const NO_PERMISSION: &str = "No permission";

/// Reported when a handshake or an established stream fails
pub const CONNECTION_INTERRUPTED: &str = "Connection was interrupted";

/// Reported when a link event arrives for a device outside the bonded set
pub const NON_PAIRED_DEVICE: &str = "Can't connect to a non-paired device.";

// ----------------------------------------------------------------------------
// Connection Results
// ----------------------------------------------------------------------------

/// One item of a `start_server` / `connect` sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionResult {
    /// The duplex channel is up; always the first non-error item
    Established,
    /// A message arrived from the peer
    Transferred(Message),
    /// Terminal failure; nothing follows it
    Error(String),
}

impl ConnectionResult {
    pub fn error(reason: impl Into<String>) -> Self {
        ConnectionResult::Error(reason.into())
    }

    /// True for the variant that ends a sequence
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionResult::Error(_))
    }
}

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Session controller state machine
///
/// Server path: `Idle → Listening → Accepting → Established → Closing → Idle`.
/// Client path: `Idle → Dialing → Established → Closing → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Listening,
    Accepting,
    Dialing,
    Established,
    Closing,
}

impl SessionState {
    /// Whether a session currently owns any socket handle
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Closing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Listening => write!(f, "listening"),
            SessionState::Accepting => write!(f, "accepting"),
            SessionState::Dialing => write!(f, "dialing"),
            SessionState::Established => write!(f, "established"),
            SessionState::Closing => write!(f, "closing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_errors_are_terminal() {
        assert!(!ConnectionResult::Established.is_terminal());
        assert!(!ConnectionResult::Transferred(Message::incoming("a", "b")).is_terminal());
        assert!(ConnectionResult::error(CONNECTION_INTERRUPTED).is_terminal());
    }

    #[test]
    fn test_session_state_activity() {
        assert!(!SessionState::default().is_active());
        assert!(SessionState::Accepting.is_active());
        assert!(SessionState::Established.is_active());
        assert!(!SessionState::Closing.is_active());
    }

    #[test]
    fn test_result_serializes() {
        let json = serde_json::to_string(&ConnectionResult::error(NO_PERMISSION)).unwrap();
        assert_eq!(json, r#"{"Error":"No permission"}"#);
    }
}
