//! Host adapter surface
//!
//! The controller never talks to a radio directly. The host supplies an
//! adapter that can enumerate bonded devices, run discovery, publish a
//! listening socket for a service record and dial one on a remote device.
//! Failures are reported as `std::io::Error` the way socket APIs report them.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bluechat_core::Device;
use tokio::sync::broadcast;

use crate::protocol::ServiceRecord;

// ----------------------------------------------------------------------------
// Adapter Events
// ----------------------------------------------------------------------------

/// Notification raised by the host adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// Discovery found a device
    DeviceFound(Device),
    /// A low-level link to the device came up
    LinkConnected(Device),
    /// A low-level link to the device went down
    LinkDisconnected(Device),
}

/// Key used to register handlers for a subset of adapter events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterEventKind {
    DeviceFound,
    LinkConnected,
    LinkDisconnected,
}

impl AdapterEvent {
    pub fn kind(&self) -> AdapterEventKind {
        match self {
            AdapterEvent::DeviceFound(_) => AdapterEventKind::DeviceFound,
            AdapterEvent::LinkConnected(_) => AdapterEventKind::LinkConnected,
            AdapterEvent::LinkDisconnected(_) => AdapterEventKind::LinkDisconnected,
        }
    }

    pub fn device(&self) -> &Device {
        match self {
            AdapterEvent::DeviceFound(device)
            | AdapterEvent::LinkConnected(device)
            | AdapterEvent::LinkDisconnected(device) => device,
        }
    }
}

// ----------------------------------------------------------------------------
// Socket Traits
// ----------------------------------------------------------------------------

/// A published listening socket
#[async_trait]
pub trait ServerSocket: Send + Sync {
    /// Wait for one peer to connect
    async fn accept(&self) -> io::Result<Arc<dyn RfcommSocket>>;

    /// Withdraw the service record; a pending `accept` fails. Idempotent.
    fn close(&self);
}

/// A duplex RFCOMM stream socket
#[async_trait]
pub trait RfcommSocket: Send + Sync {
    /// Perform the client handshake; accepted sockets are already connected
    async fn connect(&self) -> io::Result<()>;

    fn is_connected(&self) -> bool;

    /// Read into `buf`; `Ok(0)` means the peer closed the stream
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole frame
    async fn write(&self, data: &[u8]) -> io::Result<()>;

    fn remote_address(&self) -> String;

    /// Release the socket; pending reads and writes fail. Idempotent.
    fn close(&self);
}

// ----------------------------------------------------------------------------
// Adapter Trait
// ----------------------------------------------------------------------------

/// The local radio controller as exposed by the host
#[async_trait]
pub trait BluetoothAdapter: Send + Sync {
    async fn is_enabled(&self) -> bool;

    /// The adapter's own display name
    async fn name(&self) -> Option<String>;

    /// Devices previously bonded at the OS level
    async fn bonded_devices(&self) -> io::Result<Vec<Device>>;

    async fn start_discovery(&self) -> io::Result<()>;

    async fn cancel_discovery(&self) -> io::Result<()>;

    /// Publish a listening socket for `service`
    async fn listen(&self, service: &ServiceRecord) -> io::Result<Arc<dyn ServerSocket>>;

    /// Create an unconnected client socket targeting `service` on `address`
    async fn create_socket(
        &self,
        address: &str,
        service: &ServiceRecord,
    ) -> io::Result<Arc<dyn RfcommSocket>>;

    /// Subscribe to the adapter's event source
    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_and_device() {
        let device = Device::named("Pixel", "AA:BB");
        let event = AdapterEvent::LinkDisconnected(device.clone());
        assert_eq!(event.kind(), AdapterEventKind::LinkDisconnected);
        assert_eq!(event.device(), &device);
        assert_eq!(
            AdapterEvent::DeviceFound(device).kind(),
            AdapterEventKind::DeviceFound
        );
    }
}
