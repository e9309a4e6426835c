//! Error types for the RFCOMM transport

use bluechat_core::BluechatError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while setting up the RFCOMM transport
#[derive(Error, Debug)]
pub enum RfcommError {
    #[error("Bluetooth adapter not available")]
    AdapterNotAvailable,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<RfcommError> for BluechatError {
    fn from(err: RfcommError) -> Self {
        match err {
            RfcommError::AdapterNotAvailable => BluechatError::AdapterUnavailable,
            RfcommError::InvalidConfig(reason) => BluechatError::configuration(reason),
            other => BluechatError::backend(other),
        }
    }
}
