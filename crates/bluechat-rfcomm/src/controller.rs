//! Session controller
//!
//! The public face of the transport core. It combines adapter queries, the
//! device directory and one transport session into a single state machine:
//!
//! ```text
//! server: Idle → Listening → Accepting → Established → Closing → Idle
//! client: Idle → Dialing → Established → Closing → Idle
//! ```
//!
//! `start_server` and `connect` each spawn one task that drives the handshake
//! and the receive loop and hands results to the returned [`ConnectionStream`].
//! Every exit path of that task, including the consumer dropping the stream,
//! runs the close path so sockets are never leaked.

use std::future::Future;
use std::pin::{pin, Pin};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use bluechat_core::{
    BluechatResult, ConnectionResult, Device, Message, PermissionGate, SessionState,
    CONNECTION_INTERRUPTED, NON_PAIRED_DEVICE, NO_PERMISSION,
};
use futures::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterEvent, AdapterEventKind, BluetoothAdapter, RfcommSocket, ServerSocket};
use crate::config::RfcommConfig;
use crate::directory::DeviceDirectory;
use crate::events::EventSubscription;
use crate::session::TransportSession;

/// Errors are fire-and-forget; a slow subscriber only loses old notifications
const ERROR_CHANNEL_CAPACITY: usize = 32;

type ResultSender = mpsc::Sender<ConnectionResult>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Connection Stream
// ----------------------------------------------------------------------------

/// Handle to one running `start_server` / `connect` attempt
///
/// Yields `Established` first, then `Transferred` messages in wire order, and
/// at most one terminal `Error`. Dropping the handle cancels the attempt and
/// releases its sockets.
pub struct ConnectionStream {
    results: mpsc::Receiver<ConnectionResult>,
    task: JoinHandle<()>,
}

impl ConnectionStream {
    /// Wait for the next result; `None` once the attempt has ended
    pub async fn next_result(&mut self) -> Option<ConnectionResult> {
        self.results.recv().await
    }
}

impl Stream for ConnectionStream {
    type Item = ConnectionResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.results.poll_recv(cx)
    }
}

impl Drop for ConnectionStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ----------------------------------------------------------------------------
// Session Slots
// ----------------------------------------------------------------------------

/// Socket handles owned by the current session
#[derive(Default)]
struct SessionHandles {
    listener: Option<Arc<dyn ServerSocket>>,
    socket: Option<Arc<dyn RfcommSocket>>,
    transport: Option<Arc<TransportSession>>,
    task: Option<AbortHandle>,
}

impl SessionHandles {
    fn is_empty(&self) -> bool {
        self.listener.is_none()
            && self.socket.is_none()
            && self.transport.is_none()
            && self.task.is_none()
    }

    fn release(self) {
        if let Some(task) = self.task {
            task.abort();
        }
        if let Some(listener) = self.listener {
            listener.close();
        }
        drop(self.transport);
        if let Some(socket) = self.socket {
            socket.close();
        }
    }
}

#[derive(Default)]
struct SessionSlots {
    /// Bumped whenever a session starts or is closed; stale tasks compare it
    generation: u64,
    handles: SessionHandles,
}

/// Runs the close path for its generation when the session task ends
struct SessionGuard {
    inner: Arc<ControllerInner>,
    generation: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.inner.close_session(Some(self.generation));
    }
}

#[derive(Default)]
struct Subscriptions {
    link: Option<EventSubscription>,
    found: Option<EventSubscription>,
}

// ----------------------------------------------------------------------------
// Controller Internals
// ----------------------------------------------------------------------------

struct ControllerInner {
    adapter: Arc<dyn BluetoothAdapter>,
    permissions: Arc<dyn PermissionGate>,
    config: RfcommConfig,
    directory: DeviceDirectory,
    connected: watch::Sender<bool>,
    state: watch::Sender<SessionState>,
    errors: broadcast::Sender<String>,
    slots: Mutex<SessionSlots>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    discovery_task: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Subscriptions>,
}

impl ControllerInner {
    /// Close whatever is open and open a new generation
    fn begin_session(&self) -> u64 {
        let (released, generation) = {
            let mut slots = lock(&self.slots);
            slots.generation += 1;
            (std::mem::take(&mut slots.handles), slots.generation)
        };
        self.finish_close(released);
        generation
    }

    /// Release the session; with `Some(generation)` only if it is still current
    fn close_session(&self, generation: Option<u64>) {
        let released = {
            let mut slots = lock(&self.slots);
            if generation.is_some_and(|g| g != slots.generation) {
                return;
            }
            slots.generation += 1;
            std::mem::take(&mut slots.handles)
        };
        self.finish_close(released);
    }

    fn finish_close(&self, released: SessionHandles) {
        if released.is_empty() {
            self.state.send_if_modified(|state| {
                let changed = *state != SessionState::Idle;
                *state = SessionState::Idle;
                changed
            });
            return;
        }

        self.state.send_replace(SessionState::Closing);
        released.release();
        self.state.send_replace(SessionState::Idle);
        info!("Session closed");
    }

    /// Apply `update` to the slots if `generation` is still current
    fn with_current<F>(&self, generation: u64, next: SessionState, update: F) -> bool
    where
        F: FnOnce(&mut SessionHandles),
    {
        let mut slots = lock(&self.slots);
        if slots.generation != generation {
            return false;
        }
        update(&mut slots.handles);
        self.state.send_replace(next);
        true
    }

    fn attach_task(&self, generation: u64, task: AbortHandle) {
        let mut slots = lock(&self.slots);
        if slots.generation == generation {
            slots.handles.task = Some(task);
        } else {
            task.abort();
        }
    }

    fn release_listener(&self, generation: u64) {
        let listener = {
            let mut slots = lock(&self.slots);
            if slots.generation != generation {
                return;
            }
            slots.handles.listener.take()
        };
        if let Some(listener) = listener {
            listener.close();
        }
    }

    async fn run_server(self: Arc<Self>, results: ResultSender, generation: u64) {
        if !self.permissions.can_connect() {
            warn!("Connect permission missing, not starting server");
            let _ = results.send(ConnectionResult::error(NO_PERMISSION)).await;
            return;
        }

        let service = self.config.service();
        let listener = match self.adapter.listen(&service).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to listen on {}: {}", service, e);
                let _ = results
                    .send(ConnectionResult::error(CONNECTION_INTERRUPTED))
                    .await;
                return;
            }
        };

        let stored = self.with_current(generation, SessionState::Listening, |handles| {
            handles.listener = Some(Arc::clone(&listener));
        });
        if !stored {
            listener.close();
            return;
        }
        info!("Listening on {}", service);

        self.with_current(generation, SessionState::Accepting, |_| {});
        let accepted = listener.accept().await;
        self.release_listener(generation);
        listener.close();

        let socket = match accepted {
            Ok(socket) => socket,
            Err(e) => {
                error!("Failed to accept connection on {}: {}", service, e);
                return;
            }
        };
        info!("Accepted connection from {}", socket.remote_address());

        self.stream_session(&results, generation, socket).await;
    }

    async fn run_connect(self: Arc<Self>, device: Device, results: ResultSender, generation: u64) {
        if !self.permissions.can_connect() {
            warn!("Connect permission missing, not dialing {}", device);
            let _ = results.send(ConnectionResult::error(NO_PERMISSION)).await;
            return;
        }

        let service = self.config.service();
        let socket = match self.adapter.create_socket(&device.address, &service).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Failed to create socket for {}: {}", device, e);
                let _ = results
                    .send(ConnectionResult::error(CONNECTION_INTERRUPTED))
                    .await;
                return;
            }
        };

        let stored = self.with_current(generation, SessionState::Dialing, |handles| {
            handles.socket = Some(Arc::clone(&socket));
        });
        if !stored {
            socket.close();
            return;
        }

        self.stop_discovery().await;

        info!("Connecting to {} on {}", device, service);
        if let Err(e) = socket.connect().await {
            warn!("Connection to {} failed: {}", device, e);
            let _ = results
                .send(ConnectionResult::error(CONNECTION_INTERRUPTED))
                .await;
            return;
        }

        self.stream_session(&results, generation, socket).await;
    }

    async fn stream_session(
        &self,
        results: &ResultSender,
        generation: u64,
        socket: Arc<dyn RfcommSocket>,
    ) {
        let remote = socket.remote_address();
        let transport = Arc::new(TransportSession::new(
            Arc::clone(&socket),
            self.config.read_buffer_size,
        ));

        let stored = self.with_current(generation, SessionState::Established, |handles| {
            handles.socket = Some(socket);
            handles.transport = Some(Arc::clone(&transport));
        });
        if !stored {
            transport.socket().close();
            return;
        }

        if results.send(ConnectionResult::Established).await.is_err() {
            return;
        }
        info!("Session established with {}", remote);

        let mut messages = pin!(transport.receive());
        while let Some(item) = messages.next().await {
            let result = match item {
                Ok(message) => ConnectionResult::Transferred(message),
                Err(e) => ConnectionResult::error(e.to_string()),
            };
            if results.send(result).await.is_err() {
                debug!("Session consumer went away");
                return;
            }
        }
        info!("Session with {} ended", remote);
    }

    async fn stop_discovery(&self) {
        if !self.permissions.can_scan() {
            debug!("Scan permission missing, not cancelling discovery");
            return;
        }

        let pending = lock(&self.discovery_task).take();
        if let Some(task) = pending {
            task.abort();
            let _ = task.await;
        }

        match self.adapter.cancel_discovery().await {
            Ok(()) => debug!("Discovery cancelled"),
            Err(e) => warn!("Failed to cancel discovery: {}", e),
        }
    }

    async fn on_link_event(&self, event: AdapterEvent) {
        let (device, connected) = match event {
            AdapterEvent::LinkConnected(device) => (device, true),
            AdapterEvent::LinkDisconnected(device) => (device, false),
            AdapterEvent::DeviceFound(_) => return,
        };

        if !self.permissions.can_connect() {
            debug!("Connect permission missing, ignoring link event for {}", device);
            return;
        }

        if self.directory.is_bonded(&device).await {
            info!(
                "Link to {} is {}",
                device,
                if connected { "up" } else { "down" }
            );
            self.connected.send_replace(connected);
        } else {
            warn!("Link event from non-paired device {}", device);
            let _ = self.errors.send(NON_PAIRED_DEVICE.to_string());
        }
    }

    fn register_found_subscription(self: &Arc<Self>) {
        let mut subscriptions = lock(&self.subscriptions);
        if subscriptions.found.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        subscriptions.found = Some(EventSubscription::register(
            &*self.adapter,
            &[AdapterEventKind::DeviceFound],
            move |event| {
                let weak = weak.clone();
                async move {
                    if let (Some(inner), AdapterEvent::DeviceFound(device)) = (weak.upgrade(), event)
                    {
                        inner.directory.on_device_found(device);
                    }
                }
            },
        ));
    }
}

/// Cancel the task in `slot` and start `work` once it has fully finished
fn replace_task<F>(slot: &Mutex<Option<JoinHandle<()>>>, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut current = lock(slot);
    let previous = current.take();
    if let Some(previous) = &previous {
        previous.abort();
    }
    *current = Some(tokio::spawn(async move {
        if let Some(previous) = previous {
            let _ = previous.await;
        }
        work.await;
    }));
}

// ----------------------------------------------------------------------------
// Session Controller
// ----------------------------------------------------------------------------

/// Orchestrates adapter, device directory and the single transport session
///
/// Construct one per application and share it by reference (or `Arc`).
/// Construction and every operation must happen inside a tokio runtime.
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    /// Create a controller and register its link-event subscription
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        permissions: Arc<dyn PermissionGate>,
        config: RfcommConfig,
    ) -> BluechatResult<Self> {
        config.validate()?;

        let directory = DeviceDirectory::new(Arc::clone(&adapter), Arc::clone(&permissions));
        let (connected, _) = watch::channel(false);
        let (state, _) = watch::channel(SessionState::Idle);
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);

        let inner = Arc::new(ControllerInner {
            adapter,
            permissions,
            config,
            directory,
            connected,
            state,
            errors,
            slots: Mutex::new(SessionSlots::default()),
            refresh_task: Mutex::new(None),
            discovery_task: Mutex::new(None),
            subscriptions: Mutex::new(Subscriptions::default()),
        });

        let weak = Arc::downgrade(&inner);
        let link = EventSubscription::register(
            &*inner.adapter,
            &[
                AdapterEventKind::LinkConnected,
                AdapterEventKind::LinkDisconnected,
            ],
            move |event| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_link_event(event).await;
                    }
                }
            },
        );
        lock(&inner.subscriptions).link = Some(link);

        let controller = Self { inner };
        controller.refresh_paired_devices();
        info!("Session controller ready for {}", controller.inner.config.service());
        Ok(controller)
    }

    pub fn config(&self) -> &RfcommConfig {
        &self.inner.config
    }

    /// Whether the host adapter is powered on
    pub async fn is_enabled(&self) -> bool {
        self.inner.adapter.is_enabled().await
    }

    pub async fn adapter_name(&self) -> Option<String> {
        self.inner.adapter.name().await
    }

    /// Query the bonded set directly, bypassing the published listing
    pub async fn bonded_devices(&self) -> Vec<Device> {
        self.inner.directory.list_bonded().await
    }

    // ------------------------------------------------------------------------
    // Observable State
    // ------------------------------------------------------------------------

    /// Link connectivity of bonded peers
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Devices found by discovery that are not bonded
    pub fn scanned_devices(&self) -> watch::Receiver<Vec<Device>> {
        self.inner.directory.scanned_devices()
    }

    pub fn paired_devices(&self) -> watch::Receiver<Vec<Device>> {
        self.inner.directory.paired_devices()
    }

    pub fn session_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Transient error notifications; past errors are not replayed
    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.inner.errors.subscribe()
    }

    /// Whether a transport session is established
    pub fn has_session(&self) -> bool {
        lock(&self.inner.slots).handles.transport.is_some()
    }

    /// Whether a listening socket is currently published
    pub fn is_listening(&self) -> bool {
        lock(&self.inner.slots).handles.listener.is_some()
    }

    // ------------------------------------------------------------------------
    // Device Listings
    // ------------------------------------------------------------------------

    /// Re-query the bonded set, superseding any refresh still in flight
    pub fn refresh_paired_devices(&self) {
        let inner = Arc::clone(&self.inner);
        replace_task(&self.inner.refresh_task, async move {
            inner.directory.refresh_paired().await;
        });
    }

    /// Start discovery, superseding any start still in flight
    pub fn start_discovery(&self) {
        if !self.inner.permissions.can_scan() {
            debug!("Scan permission missing, not starting discovery");
            return;
        }

        self.inner.register_found_subscription();

        let inner = Arc::clone(&self.inner);
        replace_task(&self.inner.discovery_task, async move {
            inner.directory.refresh_paired().await;
            match inner.adapter.start_discovery().await {
                Ok(()) => info!("Discovery started"),
                Err(e) => warn!("Failed to start discovery: {}", e),
            }
        });
    }

    pub async fn stop_discovery(&self) {
        self.inner.stop_discovery().await;
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    /// Listen for one peer on the configured service record
    pub fn start_server(&self) -> ConnectionStream {
        self.launch(|inner, results, generation| inner.run_server(results, generation))
    }

    /// Dial the configured service record on `device`
    pub fn connect(&self, device: &Device) -> ConnectionStream {
        let device = device.clone();
        self.launch(move |inner, results, generation| {
            inner.run_connect(device, results, generation)
        })
    }

    fn launch<F, Fut>(&self, run: F) -> ConnectionStream
    where
        F: FnOnce(Arc<ControllerInner>, ResultSender, u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (results, receiver) = mpsc::channel(self.inner.config.result_buffer);
        let generation = self.inner.begin_session();
        let guard = SessionGuard {
            inner: Arc::clone(&self.inner),
            generation,
        };

        let work = run(Arc::clone(&self.inner), results, generation);
        let task = tokio::spawn(async move {
            let _guard = guard;
            work.await;
        });
        self.inner.attach_task(generation, task.abort_handle());

        ConnectionStream {
            results: receiver,
            task,
        }
    }

    /// Send a chat line over the established session
    ///
    /// Returns the sent message, or `None` when there is no session, the
    /// write failed, or connect permission is missing.
    pub async fn send_message(&self, text: &str) -> Option<Message> {
        if !self.inner.permissions.can_connect() {
            return None;
        }
        let transport = lock(&self.inner.slots).handles.transport.clone()?;

        let sender = self
            .inner
            .adapter
            .name()
            .await
            .unwrap_or_else(|| self.inner.config.unknown_sender_name.clone());
        let message = Message::outgoing(text, sender);

        if transport.send(&message).await {
            Some(message)
        } else {
            None
        }
    }

    /// Release listening and duplex sockets; safe to call repeatedly
    pub fn close(&self) {
        self.inner.close_session(None);
    }

    /// Unregister adapter subscriptions, stop background work and close
    pub fn release(&self) {
        let subscriptions = std::mem::take(&mut *lock(&self.inner.subscriptions));
        drop(subscriptions);

        for slot in [&self.inner.refresh_task, &self.inner.discovery_task] {
            let task = lock(slot).take();
            if let Some(task) = task {
                task.abort();
            }
        }

        self.close();
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.release();
    }
}
