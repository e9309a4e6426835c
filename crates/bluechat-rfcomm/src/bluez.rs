//! BlueZ adapter using bluer
//!
//! Service records are published as BlueZ profiles. The server registers the
//! profile in the server role and accepts the first connect request; the
//! client registers it in the client role and asks BlueZ to connect the
//! profile on the remote device, which hands the new stream back through the
//! same registration.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use async_trait::async_trait;
use bluechat_core::Device;
use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::{Address, AdapterEvent as BluezEvent, DeviceEvent, DeviceProperty};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{AdapterEvent, BluetoothAdapter, RfcommSocket, ServerSocket};
use crate::error::RfcommError;
use crate::protocol::ServiceRecord;
use crate::socket::StreamSocket;

const EVENT_CAPACITY: usize = 64;

type BluezStream = StreamSocket<bluer::rfcomm::Stream>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_io(err: bluer::Error) -> io::Error {
    io::Error::other(err)
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed")
}

fn parse_address(address: &str) -> io::Result<Address> {
    address
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, RfcommError::InvalidAddress(address.to_string())))
}

async fn describe(device: &bluer::Device) -> Device {
    let name = device.name().await.ok().flatten();
    Device::new(name, device.address().to_string())
}

// ----------------------------------------------------------------------------
// Adapter
// ----------------------------------------------------------------------------

struct Tasks {
    monitor: Option<JoinHandle<()>>,
    discovery: Option<JoinHandle<()>>,
}

impl Drop for Tasks {
    fn drop(&mut self) {
        for task in [self.monitor.take(), self.discovery.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

/// The host's default BlueZ adapter
pub struct BluezAdapter {
    session: bluer::Session,
    adapter: bluer::Adapter,
    events: broadcast::Sender<AdapterEvent>,
    tasks: Mutex<Tasks>,
}

impl BluezAdapter {
    /// Connect to BlueZ and start watching link state of known devices
    pub async fn open() -> Result<Self, RfcommError> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| RfcommError::Backend(format!("BlueZ session: {}", e)))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| RfcommError::AdapterNotAvailable)?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let monitor = tokio::spawn(monitor_links(adapter.clone(), events.clone()));

        info!("Using BlueZ adapter {}", adapter.name());
        Ok(Self {
            session,
            adapter,
            events,
            tasks: Mutex::new(Tasks {
                monitor: Some(monitor),
                discovery: None,
            }),
        })
    }

    async fn register(&self, service: &ServiceRecord, role: Role) -> io::Result<ProfileHandle> {
        let profile = Profile {
            uuid: service.uuid,
            name: Some(service.name.clone()),
            role: Some(role),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        self.session.register_profile(profile).await.map_err(to_io)
    }
}

/// Forward `Connected` property changes of every device as link events
async fn monitor_links(adapter: bluer::Adapter, events: broadcast::Sender<AdapterEvent>) {
    let mut adapter_events = match adapter.events().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Cannot watch BlueZ adapter events: {}", e);
            return;
        }
    };

    let mut watched = HashSet::new();
    let mut watchers = Vec::new();
    let known = adapter.device_addresses().await.unwrap_or_default();

    for address in known {
        if watched.insert(address) {
            watchers.push(tokio::spawn(watch_device(adapter.clone(), address, events.clone())));
        }
    }

    while let Some(event) = adapter_events.next().await {
        if let BluezEvent::DeviceAdded(address) = event {
            if watched.insert(address) {
                watchers.push(tokio::spawn(watch_device(adapter.clone(), address, events.clone())));
            }
        }
    }

    for watcher in watchers {
        watcher.abort();
    }
}

async fn watch_device(adapter: bluer::Adapter, address: Address, events: broadcast::Sender<AdapterEvent>) {
    let Ok(device) = adapter.device(address) else {
        return;
    };
    let Ok(mut changes) = device.events().await else {
        return;
    };

    while let Some(DeviceEvent::PropertyChanged(property)) = changes.next().await {
        if let DeviceProperty::Connected(connected) = property {
            let record = describe(&device).await;
            debug!("BlueZ link to {} connected={}", record, connected);
            let event = if connected {
                AdapterEvent::LinkConnected(record)
            } else {
                AdapterEvent::LinkDisconnected(record)
            };
            let _ = events.send(event);
        }
    }
}

#[async_trait]
impl BluetoothAdapter for BluezAdapter {
    async fn is_enabled(&self) -> bool {
        self.adapter.is_powered().await.unwrap_or(false)
    }

    async fn name(&self) -> Option<String> {
        self.adapter.alias().await.ok()
    }

    async fn bonded_devices(&self) -> io::Result<Vec<Device>> {
        let mut bonded = Vec::new();
        for address in self.adapter.device_addresses().await.map_err(to_io)? {
            let device = self.adapter.device(address).map_err(to_io)?;
            if device.is_paired().await.unwrap_or(false) {
                bonded.push(describe(&device).await);
            }
        }
        Ok(bonded)
    }

    async fn start_discovery(&self) -> io::Result<()> {
        let mut found = self.adapter.discover_devices().await.map_err(to_io)?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = found.next().await {
                let BluezEvent::DeviceAdded(address) = event else {
                    continue;
                };
                let Ok(device) = adapter.device(address) else {
                    continue;
                };
                if device.is_paired().await.unwrap_or(false) {
                    continue;
                }
                let _ = events.send(AdapterEvent::DeviceFound(describe(&device).await));
            }
        });

        if let Some(previous) = lock(&self.tasks).discovery.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel_discovery(&self) -> io::Result<()> {
        // Dropping the discovery stream ends the BlueZ discovery session
        if let Some(task) = lock(&self.tasks).discovery.take() {
            task.abort();
        }
        Ok(())
    }

    async fn listen(&self, service: &ServiceRecord) -> io::Result<Arc<dyn ServerSocket>> {
        let handle = self.register(service, Role::Server).await?;
        Ok(Arc::new(BluezServerSocket {
            handle: tokio::sync::Mutex::new(Some(handle)),
            closed: CancellationToken::new(),
        }))
    }

    async fn create_socket(
        &self,
        address: &str,
        service: &ServiceRecord,
    ) -> io::Result<Arc<dyn RfcommSocket>> {
        let target = parse_address(address)?;
        let device = self.adapter.device(target).map_err(to_io)?;
        let handle = self.register(service, Role::Client).await?;

        Ok(Arc::new(BluezSocket {
            remote_address: address.to_string(),
            device,
            uuid: service.uuid,
            handle: tokio::sync::Mutex::new(Some(handle)),
            stream: OnceLock::new(),
            closed: CancellationToken::new(),
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}

// ----------------------------------------------------------------------------
// Server Socket
// ----------------------------------------------------------------------------

struct BluezServerSocket {
    handle: tokio::sync::Mutex<Option<ProfileHandle>>,
    closed: CancellationToken,
}

#[async_trait]
impl ServerSocket for BluezServerSocket {
    async fn accept(&self) -> io::Result<Arc<dyn RfcommSocket>> {
        let mut handle = self.handle.lock().await;
        let Some(profile) = handle.as_mut() else {
            return Err(closed_error());
        };

        let request = tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            request = profile.next() => request,
        };

        let Some(request) = request else {
            handle.take();
            return Err(closed_error());
        };

        let remote = request.device().to_string();
        let stream = request.accept().map_err(to_io)?;
        debug!("Accepted RFCOMM stream from {}", remote);
        Ok(Arc::new(StreamSocket::new(stream, remote)))
    }

    fn close(&self) {
        self.closed.cancel();
        // A pending accept drops the registration itself once it observes the cancel
        if let Ok(mut handle) = self.handle.try_lock() {
            handle.take();
        }
    }
}

// ----------------------------------------------------------------------------
// Client Socket
// ----------------------------------------------------------------------------

struct BluezSocket {
    remote_address: String,
    device: bluer::Device,
    uuid: Uuid,
    handle: tokio::sync::Mutex<Option<ProfileHandle>>,
    stream: OnceLock<Arc<BluezStream>>,
    closed: CancellationToken,
}

impl BluezSocket {
    fn connected_stream(&self) -> io::Result<&Arc<BluezStream>> {
        self.stream
            .get()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket not connected"))
    }
}

#[async_trait]
impl RfcommSocket for BluezSocket {
    async fn connect(&self) -> io::Result<()> {
        if self.stream.get().is_some() {
            return Ok(());
        }

        let mut handle = self.handle.lock().await;
        let Some(profile) = handle.as_mut() else {
            return Err(closed_error());
        };

        let device = self.device.clone();
        let uuid = self.uuid;
        let mut dialing = tokio::spawn(async move { device.connect_profile(&uuid).await });
        let mut pending = true;

        let request = loop {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => {
                    dialing.abort();
                    return Err(closed_error());
                }
                request = profile.next() => break request,
                outcome = &mut dialing, if pending => {
                    pending = false;
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return Err(to_io(e)),
                        Err(e) => return Err(io::Error::other(e)),
                    }
                }
            }
        };

        let request = request.ok_or_else(closed_error)?;
        let stream = request.accept().map_err(to_io)?;
        let _ = self
            .stream
            .set(Arc::new(StreamSocket::new(stream, self.remote_address.clone())));
        debug!("RFCOMM stream to {} connected", self.remote_address);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed.is_cancelled() && self.stream.get().is_some_and(|stream| stream.is_connected())
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.connected_stream()?.read(buf).await
    }

    async fn write(&self, data: &[u8]) -> io::Result<()> {
        self.connected_stream()?.write(data).await
    }

    fn remote_address(&self) -> String {
        self.remote_address.clone()
    }

    fn close(&self) {
        self.closed.cancel();
        if let Some(stream) = self.stream.get() {
            stream.close();
        }
        if let Ok(mut handle) = self.handle.try_lock() {
            handle.take();
        }
    }
}
