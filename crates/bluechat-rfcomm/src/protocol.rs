//! RFCOMM protocol constants for BlueChat

use core::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Service Record
// ----------------------------------------------------------------------------

/// BlueChat serial-profile service UUID; both endpoints must agree on it
pub const BLUECHAT_SERVICE_UUID: Uuid = Uuid::from_u128(0x27b7d1da_08c7_4505_a6d1_2459987e5e2d);

/// Human-readable name published with the service record
pub const BLUECHAT_SERVICE_NAME: &str = "chat_service";

/// Size of the reusable receive buffer; bounds the largest single frame
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Sender label used when the adapter does not report its own name
pub const UNKNOWN_SENDER_NAME: &str = "Unknown name";

/// Identifier pair under which a listening socket is published and dialed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub uuid: Uuid,
    pub name: String,
}

impl ServiceRecord {
    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
        }
    }
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self::new(BLUECHAT_SERVICE_UUID, BLUECHAT_SERVICE_NAME)
    }
}

impl fmt::Display for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_record() {
        let record = ServiceRecord::default();
        assert_eq!(
            record.uuid.to_string(),
            "27b7d1da-08c7-4505-a6d1-2459987e5e2d"
        );
        assert_eq!(record.name, "chat_service");
    }
}
