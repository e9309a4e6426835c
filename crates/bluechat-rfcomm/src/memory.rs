//! In-process radio
//!
//! A [`MemoryRadio`] connects any number of [`MemoryAdapter`]s living in the
//! same process. Listening sockets are published in a registry keyed by
//! adapter address and service UUID; dialing one creates a tokio duplex pipe
//! between the two endpoints. Used by the demo command and by tests.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use async_trait::async_trait;
use bluechat_core::{Device, TransportError};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::adapter::{AdapterEvent, BluetoothAdapter, RfcommSocket, ServerSocket};
use crate::protocol::ServiceRecord;
use crate::socket::StreamSocket;

/// Capacity of each direction of an in-process link
const PIPE_CAPACITY: usize = 4096;

const EVENT_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn disabled_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "adapter is disabled")
}

fn address_key(address: &str) -> String {
    address.to_ascii_uppercase()
}

// ----------------------------------------------------------------------------
// Radio
// ----------------------------------------------------------------------------

type ListenerKey = (String, Uuid);

struct ListenerEntry {
    id: u64,
    incoming: mpsc::UnboundedSender<Arc<dyn RfcommSocket>>,
}

#[derive(Default)]
struct RadioInner {
    adapters: Mutex<HashMap<String, Arc<AdapterState>>>,
    listeners: Mutex<HashMap<ListenerKey, ListenerEntry>>,
    next_listener: AtomicU64,
}

impl RadioInner {
    fn adapter_at(&self, address: &str) -> Option<Arc<AdapterState>> {
        lock(&self.adapters).get(&address_key(address)).cloned()
    }
}

/// Shared medium for in-process adapters
#[derive(Clone, Default)]
pub struct MemoryRadio {
    inner: Arc<RadioInner>,
}

impl MemoryRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a named adapter at `address`
    pub fn adapter(&self, name: impl Into<String>, address: impl Into<String>) -> MemoryAdapter {
        self.attach(Some(name.into()), address.into())
    }

    /// Attach an adapter that does not report a name
    pub fn anonymous_adapter(&self, address: impl Into<String>) -> MemoryAdapter {
        self.attach(None, address.into())
    }

    fn attach(&self, name: Option<String>, address: String) -> MemoryAdapter {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = Arc::new(AdapterState {
            name,
            address,
            enabled: AtomicBool::new(true),
            discovering: AtomicBool::new(false),
            bonded: Mutex::new(Vec::new()),
            events,
        });
        lock(&self.inner.adapters).insert(address_key(&state.address), Arc::clone(&state));
        debug!("Attached in-memory adapter {}", state.device());

        MemoryAdapter {
            radio: Arc::clone(&self.inner),
            state,
        }
    }

    /// Bond two adapters with each other
    pub fn pair(&self, first: &MemoryAdapter, second: &MemoryAdapter) {
        first.bond(second.device());
        second.bond(first.device());
    }

    /// Number of currently published listening sockets
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }
}

// ----------------------------------------------------------------------------
// Adapter
// ----------------------------------------------------------------------------

struct AdapterState {
    name: Option<String>,
    address: String,
    enabled: AtomicBool,
    discovering: AtomicBool,
    bonded: Mutex<Vec<Device>>,
    events: broadcast::Sender<AdapterEvent>,
}

impl AdapterState {
    fn device(&self) -> Device {
        Device::new(self.name.clone(), self.address.clone())
    }

    fn emit(&self, event: AdapterEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn is_bonded_to(&self, device: &Device) -> bool {
        lock(&self.bonded).iter().any(|bonded| bonded.same_address(device))
    }
}

/// One endpoint on a [`MemoryRadio`]
#[derive(Clone)]
pub struct MemoryAdapter {
    radio: Arc<RadioInner>,
    state: Arc<AdapterState>,
}

impl MemoryAdapter {
    /// This adapter as seen by its peers
    pub fn device(&self) -> Device {
        self.state.device()
    }

    pub fn bond(&self, device: Device) {
        let mut bonded = lock(&self.state.bonded);
        if !bonded.iter().any(|known| known.same_address(&device)) {
            bonded.push(device);
        }
    }

    pub fn unbond(&self, address: &str) {
        lock(&self.state.bonded).retain(|device| !device.address.eq_ignore_ascii_case(address));
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_discovering(&self) -> bool {
        self.state.discovering.load(Ordering::SeqCst)
    }

    /// Raise an adapter event as if it came from the host
    pub fn emit(&self, event: AdapterEvent) {
        self.state.emit(event);
    }
}

#[async_trait]
impl BluetoothAdapter for MemoryAdapter {
    async fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    async fn name(&self) -> Option<String> {
        self.state.name.clone()
    }

    async fn bonded_devices(&self) -> io::Result<Vec<Device>> {
        if !self.state.is_enabled() {
            return Err(disabled_error());
        }
        Ok(lock(&self.state.bonded).clone())
    }

    async fn start_discovery(&self) -> io::Result<()> {
        if !self.state.is_enabled() {
            return Err(disabled_error());
        }
        self.state.discovering.store(true, Ordering::SeqCst);

        let mut visible: Vec<Device> = lock(&self.radio.adapters)
            .values()
            .filter(|other| !Arc::ptr_eq(other, &self.state) && other.is_enabled())
            .map(|other| other.device())
            .filter(|device| !self.state.is_bonded_to(device))
            .collect();
        visible.sort_by(|a, b| a.address.cmp(&b.address));

        debug!("Discovery on {} sees {} devices", self.state.address, visible.len());
        for device in visible {
            self.state.emit(AdapterEvent::DeviceFound(device));
        }
        Ok(())
    }

    async fn cancel_discovery(&self) -> io::Result<()> {
        self.state.discovering.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn listen(&self, service: &ServiceRecord) -> io::Result<Arc<dyn ServerSocket>> {
        if !self.state.is_enabled() {
            return Err(disabled_error());
        }

        let key = (address_key(&self.state.address), service.uuid);
        let id = self.radio.next_listener.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        {
            let mut listeners = lock(&self.radio.listeners);
            if listeners.contains_key(&key) {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    TransportError::ServiceBusy {
                        service: service.to_string(),
                    },
                ));
            }
            listeners.insert(
                key.clone(),
                ListenerEntry {
                    id,
                    incoming: sender,
                },
            );
        }
        info!("Published {} on {}", service, self.state.address);

        Ok(Arc::new(MemoryServerSocket {
            radio: Arc::clone(&self.radio),
            key,
            id,
            incoming: tokio::sync::Mutex::new(receiver),
            closed: CancellationToken::new(),
        }))
    }

    async fn create_socket(
        &self,
        address: &str,
        service: &ServiceRecord,
    ) -> io::Result<Arc<dyn RfcommSocket>> {
        if !self.state.is_enabled() {
            return Err(disabled_error());
        }
        Ok(Arc::new(MemorySocket::dialer(
            Arc::clone(&self.radio),
            Arc::clone(&self.state),
            address.to_string(),
            service.uuid,
        )))
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.state.events.subscribe()
    }
}

// ----------------------------------------------------------------------------
// Server Socket
// ----------------------------------------------------------------------------

struct MemoryServerSocket {
    radio: Arc<RadioInner>,
    key: ListenerKey,
    id: u64,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<dyn RfcommSocket>>>,
    closed: CancellationToken,
}

#[async_trait]
impl ServerSocket for MemoryServerSocket {
    async fn accept(&self) -> io::Result<Arc<dyn RfcommSocket>> {
        let aborted = || io::Error::new(io::ErrorKind::ConnectionAborted, "listener closed");

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(aborted()),
            socket = async { self.incoming.lock().await.recv().await } => socket.ok_or_else(aborted),
        }
    }

    fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        let mut listeners = lock(&self.radio.listeners);
        if listeners.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            listeners.remove(&self.key);
            debug!("Withdrew listener {} on {}", self.key.1, self.key.0);
        }
    }
}

impl Drop for MemoryServerSocket {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------------
// Socket
// ----------------------------------------------------------------------------

/// Low-level link between two adapters; reports down exactly once
struct Link {
    ends: [Arc<AdapterState>; 2],
    down: AtomicBool,
}

impl Link {
    fn up(ends: [Arc<AdapterState>; 2]) -> Arc<Self> {
        ends[0].emit(AdapterEvent::LinkConnected(ends[1].device()));
        ends[1].emit(AdapterEvent::LinkConnected(ends[0].device()));
        Arc::new(Self {
            ends,
            down: AtomicBool::new(false),
        })
    }

    fn down(&self) {
        if self.down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ends[0].emit(AdapterEvent::LinkDisconnected(self.ends[1].device()));
        self.ends[1].emit(AdapterEvent::LinkDisconnected(self.ends[0].device()));
    }
}

/// Everything a client socket needs to reach its listener
struct Dial {
    radio: Arc<RadioInner>,
    local: Arc<AdapterState>,
    uuid: Uuid,
}

struct MemorySocket {
    remote_address: String,
    dial: Option<Dial>,
    stream: OnceLock<Arc<StreamSocket<DuplexStream>>>,
    link: OnceLock<Arc<Link>>,
    closed: CancellationToken,
}

impl MemorySocket {
    fn dialer(radio: Arc<RadioInner>, local: Arc<AdapterState>, remote: String, uuid: Uuid) -> Self {
        Self {
            remote_address: remote,
            dial: Some(Dial { radio, local, uuid }),
            stream: OnceLock::new(),
            link: OnceLock::new(),
            closed: CancellationToken::new(),
        }
    }

    fn accepted(stream: Arc<StreamSocket<DuplexStream>>, remote: String, link: Arc<Link>) -> Self {
        Self {
            remote_address: remote,
            dial: None,
            stream: OnceLock::from(stream),
            link: OnceLock::from(link),
            closed: CancellationToken::new(),
        }
    }

    fn connected_stream(&self) -> io::Result<&Arc<StreamSocket<DuplexStream>>> {
        self.stream
            .get()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, TransportError::NotConnected))
    }
}

#[async_trait]
impl RfcommSocket for MemorySocket {
    async fn connect(&self) -> io::Result<()> {
        if self.closed.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed"));
        }
        if self.stream.get().is_some() {
            return Ok(());
        }
        let Some(dial) = &self.dial else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, TransportError::NotConnected));
        };

        let refused = || {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no listener for {} on {}", dial.uuid, self.remote_address),
            )
        };

        let remote = dial.radio.adapter_at(&self.remote_address).ok_or_else(refused)?;
        let incoming = lock(&dial.radio.listeners)
            .get(&(address_key(&self.remote_address), dial.uuid))
            .map(|entry| entry.incoming.clone())
            .ok_or_else(refused)?;

        let (near, far) = duplex(PIPE_CAPACITY);
        let hangup = CancellationToken::new();
        let local_stream = Arc::new(StreamSocket::with_hangup(
            near,
            self.remote_address.clone(),
            hangup.clone(),
        ));
        let remote_stream = Arc::new(StreamSocket::with_hangup(
            far,
            dial.local.address.clone(),
            hangup,
        ));

        let link = Link::up([Arc::clone(&dial.local), remote]);
        let peer = MemorySocket::accepted(remote_stream, dial.local.address.clone(), Arc::clone(&link));
        if incoming.send(Arc::new(peer)).is_err() {
            link.down();
            return Err(refused());
        }

        let _ = self.stream.set(local_stream);
        let _ = self.link.set(link);
        if self.closed.is_cancelled() {
            self.close();
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed"));
        }

        debug!("In-memory link {} -> {} up", dial.local.address, self.remote_address);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.get().is_some_and(|stream| stream.is_connected())
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
        if let Some(link) = self.link.get() {
            link.down();
        }
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.close();
    }
}
