//! BlueChat Core
//!
//! Foundational types for the BlueChat RFCOMM chat: radio devices, chat
//! messages, the `<sender>#<body>` wire codec, connection results, the session
//! state machine and the permission gate. Transport backends live in
//! `bluechat-rfcomm`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod codec;
pub mod connection;
pub mod errors;
pub mod permission;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use connection::{
    ConnectionResult, SessionState, CONNECTION_INTERRUPTED, NON_PAIRED_DEVICE, NO_PERMISSION,
};
pub use errors::{BluechatError, BluechatResult, TransportError};
pub use permission::{Capability, CapabilityTier, PermissionGate, RuntimePermissions};
pub use types::{Device, Message};
