//! Core types for BlueChat
//!
//! Radio peers and chat lines. Both are plain immutable values: they are
//! created when the adapter reports a device or when a frame is decoded, and
//! are never persisted by the core.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Device
// ----------------------------------------------------------------------------

/// A radio peer as reported by the host adapter
///
/// Two devices are equal when both the display name and the hardware address
/// match. Listings deduplicate by this equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Display name, absent when the host withholds it
    pub name: Option<String>,
    /// Hardware address, e.g. `00:11:22:AA:BB:CC`
    pub address: String,
}

impl Device {
    /// Create a new device record
    pub fn new(name: Option<String>, address: impl Into<String>) -> Self {
        Self {
            name,
            address: address.into(),
        }
    }

    /// Create a device record with a known display name
    pub fn named(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(Some(name.into()), address)
    }

    /// Name to show in listings, falling back to the address
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    /// Whether this record refers to the same hardware as `other`
    pub fn same_address(&self, other: &Device) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// One chat line, inbound or outbound
///
/// Neither `sender` nor `body` may contain the wire delimiter; see
/// [`crate::codec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Text of the chat line
    pub body: String,
    /// Free-form sender label
    pub sender: String,
    /// True when produced by this endpoint
    pub local: bool,
}

impl Message {
    pub fn new(body: impl Into<String>, sender: impl Into<String>, local: bool) -> Self {
        Self {
            body: body.into(),
            sender: sender.into(),
            local,
        }
    }

    /// A message typed on this endpoint
    pub fn outgoing(body: impl Into<String>, sender: impl Into<String>) -> Self {
        Self::new(body, sender, true)
    }

    /// A message decoded from the wire
    pub fn incoming(body: impl Into<String>, sender: impl Into<String>) -> Self {
        Self::new(body, sender, false)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.sender, self.body)
    }
}
