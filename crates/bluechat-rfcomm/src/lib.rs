//! RFCOMM transport for BlueChat
//!
//! This crate drives a single point-to-point chat session over a Bluetooth
//! serial (RFCOMM) link. It is organized into several modules:
//!
//! - [`adapter`] - Host adapter and socket traits every backend implements
//! - [`config`] - Transport configuration and settings
//! - [`controller`] - Session state machine and public operations
//! - [`directory`] - Bonded and discovered device listings
//! - [`events`] - Keyed subscriptions to adapter events
//! - [`memory`] - In-process radio used by the demo and by tests
//! - [`session`] - Message stream over one connected socket
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bluechat_core::{ConnectionResult, RuntimePermissions};
//! use bluechat_rfcomm::{MemoryRadio, RfcommConfig, SessionController};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let radio = MemoryRadio::new();
//! let adapter = radio.adapter("Kitchen", "00:11:22:33:44:55");
//!
//! let controller = SessionController::new(
//!     Arc::new(adapter),
//!     Arc::new(RuntimePermissions::legacy()),
//!     RfcommConfig::new(),
//! )?;
//!
//! let mut results = controller.start_server();
//! while let Some(result) = results.next_result().await {
//!     if let ConnectionResult::Transferred(message) = result {
//!         println!("{}", message);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! - **In-memory**: always available, see [`MemoryRadio`]
//! - **Linux**: BlueZ through the `bluer` crate, behind the `bluez` feature

pub mod adapter;
pub mod config;
pub mod controller;
pub mod directory;
pub mod events;
pub mod memory;
pub mod session;

mod error;
mod protocol;
mod socket;

#[cfg(all(target_os = "linux", feature = "bluez"))]
mod bluez;

// Public API exports
pub use adapter::{AdapterEvent, AdapterEventKind, BluetoothAdapter, RfcommSocket, ServerSocket};
pub use config::RfcommConfig;
pub use controller::{ConnectionStream, SessionController};
pub use directory::DeviceDirectory;
pub use error::RfcommError;
pub use events::EventSubscription;
pub use memory::{MemoryAdapter, MemoryRadio};
pub use protocol::{
    ServiceRecord, BLUECHAT_SERVICE_NAME, BLUECHAT_SERVICE_UUID, DEFAULT_READ_BUFFER_SIZE,
    UNKNOWN_SENDER_NAME,
};
pub use session::TransportSession;
pub use socket::StreamSocket;

#[cfg(all(target_os = "linux", feature = "bluez"))]
pub use bluez::BluezAdapter;
