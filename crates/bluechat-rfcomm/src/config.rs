//! RFCOMM transport configuration

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RfcommError;
use crate::protocol::{
    ServiceRecord, BLUECHAT_SERVICE_NAME, BLUECHAT_SERVICE_UUID, DEFAULT_READ_BUFFER_SIZE,
    UNKNOWN_SENDER_NAME,
};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the RFCOMM session controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfcommConfig {
    /// Service UUID to listen on and dial
    pub service_uuid: Uuid,
    /// Service name published with the listening socket
    pub service_name: String,
    /// Receive buffer size; frames longer than this are split and misparsed
    pub read_buffer_size: usize,
    /// Capacity of the channel between a session task and its consumer
    pub result_buffer: usize,
    /// Sender label used when the adapter reports no name
    pub unknown_sender_name: String,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            service_uuid: BLUECHAT_SERVICE_UUID,
            service_name: BLUECHAT_SERVICE_NAME.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            result_buffer: 64,
            unknown_sender_name: UNKNOWN_SENDER_NAME.to_string(),
        }
    }
}

impl RfcommConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service identifier pair
    pub fn with_service(mut self, uuid: Uuid, name: impl Into<String>) -> Self {
        self.service_uuid = uuid;
        self.service_name = name.into();
        self
    }

    /// Set receive buffer size
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set result channel capacity
    pub fn with_result_buffer(mut self, capacity: usize) -> Self {
        self.result_buffer = capacity;
        self
    }

    /// Set the fallback sender label
    pub fn with_unknown_sender_name(mut self, name: impl Into<String>) -> Self {
        self.unknown_sender_name = name.into();
        self
    }

    /// Service record built from the configured identifier pair
    pub fn service(&self) -> ServiceRecord {
        ServiceRecord::new(self.service_uuid, self.service_name.clone())
    }

    pub fn validate(&self) -> Result<(), RfcommError> {
        if self.read_buffer_size == 0 {
            return Err(RfcommError::InvalidConfig(
                "read_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.result_buffer == 0 {
            return Err(RfcommError::InvalidConfig(
                "result_buffer must be greater than 0".to_string(),
            ));
        }
        if self.service_name.is_empty() {
            return Err(RfcommError::InvalidConfig(
                "service_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let config = RfcommConfig::default();
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.service(), ServiceRecord::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_validation() {
        let config = RfcommConfig::new()
            .with_read_buffer_size(0)
            .with_unknown_sender_name("anon");
        assert_eq!(config.unknown_sender_name, "anon");
        assert!(matches!(
            config.validate(),
            Err(RfcommError::InvalidConfig(_))
        ));

        let config = RfcommConfig::new().with_service(Uuid::nil(), "");
        assert!(config.validate().is_err());
    }
}
