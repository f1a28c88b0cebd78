//! Connection management.

use crate::error::HostError;
use crate::notify::{notify_table, CallbackRegistry, HostEvent, NotifyContext};
use bytes::Bytes;
use ncplink_bus::{Bus, BusConfig, FrameReader, LinkStream};
use ncplink_protocol::command::describe;
use ncplink_protocol::message::FormationInfo;
use ncplink_protocol::{DispatchTable, Frame, FrameKind, Status, DEFAULT_PORT};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, oneshot, Mutex};

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sequence numbers usable as tokens; 0 is reserved.
const MAX_PENDING: usize = u8::MAX as usize;

/// Where the co-processor is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddr),
    Device(PathBuf),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            Endpoint::Device(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Co-processor endpoint.
    pub endpoint: Endpoint,
    /// Connection timeout (TCP only).
    pub connect_timeout: Duration,
    /// Bound on how long a call waits for its response.
    pub request_timeout: Duration,
    /// Bus sizing and output timeout.
    pub bus: BusConfig,
    /// Host event channel capacity.
    pub event_capacity: usize,
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self {
            endpoint: Endpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            bus: BusConfig::new(),
            event_capacity: crate::notify::DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_tcp(mut self, addr: SocketAddr) -> Self {
        self.endpoint = Endpoint::Tcp(addr);
        self
    }

    pub fn with_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.endpoint = Endpoint::Device(path.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_bus_config(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A caller waiting for its response.
struct PendingCall {
    command: u16,
    tx: oneshot::Sender<Frame>,
}

/// A link to a co-processor.
///
/// Requests carry a token in the sequence-number field and responses are
/// matched on it, so any number of calls may be in flight. [`read_loop`]
/// must be running for calls to complete.
///
/// [`read_loop`]: Connection::read_loop
pub struct Connection {
    config: ConnectionConfig,
    bus: Bus,
    /// Pending calls keyed by token.
    pending: Mutex<HashMap<u8, PendingCall>>,
    /// Last token handed out.
    next_sn: AtomicU8,
    connected: AtomicBool,
    notify: DispatchTable<NotifyContext>,
    ctx: NotifyContext,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Result<Self, HostError> {
        let bus = Bus::init(config.bus.clone())?;
        let ctx = NotifyContext::new(config.event_capacity);
        Ok(Self {
            config,
            bus,
            pending: Mutex::new(HashMap::new()),
            next_sn: AtomicU8::new(0),
            connected: AtomicBool::new(false),
            notify: notify_table(),
            ctx,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Opens the configured endpoint.
    pub async fn connect(&self) -> Result<(), HostError> {
        tracing::debug!("Connecting to {}...", self.config.endpoint);

        let stream = match &self.config.endpoint {
            Endpoint::Tcp(addr) => {
                tokio::time::timeout(self.config.connect_timeout, LinkStream::connect_tcp(*addr))
                    .await
                    .map_err(|_| {
                        tracing::debug!("Connection timeout");
                        std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")
                    })??
            }
            Endpoint::Device(path) => LinkStream::open_device(path).await?,
        };

        self.attach(stream).await
    }

    /// Starts the bus over an already open transport.
    pub async fn attach<T>(&self, transport: T) -> Result<(), HostError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.bus.is_running() {
            self.bus.stop().await?;
        }
        self.bus.start(transport)?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Connected to co-processor");
        Ok(())
    }

    /// Subscribes to asynchronous events.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.ctx.subscribe()
    }

    /// Callbacks run by bind, unbind and find-match completions.
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.ctx.callbacks
    }

    /// The most recently formed network reported by the co-processor.
    pub fn network(&self) -> Option<FormationInfo> {
        self.ctx.network()
    }

    /// Sends a request and waits for its response payload.
    pub async fn call(&self, command: impl Into<u16>, input: &[u8]) -> Result<Bytes, HostError> {
        let command = command.into();
        if !self.connected.load(Ordering::SeqCst) {
            tracing::debug!("call() while not connected");
            return Err(HostError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        let sn = {
            let mut pending = self.pending.lock().await;
            let sn = self.allocate_token(&pending)?;
            pending.insert(sn, PendingCall { command, tx });
            sn
        };

        let request = Frame::request(command, sn, Bytes::copy_from_slice(input));
        if let Err(e) = self.bus.send_frame(&request).await {
            self.pending.lock().await.remove(&sn);
            return Err(e.into());
        }
        tracing::debug!(
            command = %describe(command),
            sn,
            len = input.len(),
            "Request sent"
        );

        let response = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                tracing::debug!(sn, "Waiter dropped, connection closed");
                return Err(HostError::ConnectionClosed);
            }
            Err(_) => {
                tracing::debug!(command = %describe(command), sn, "Request timed out");
                self.pending.lock().await.remove(&sn);
                return Err(HostError::Timeout { command, sn });
            }
        };

        if response.is_error_response() {
            let status = response.error_status().unwrap_or(Status::Fatal);
            return Err(HostError::Rejected { command, status });
        }

        tracing::debug!(
            command = %describe(command),
            sn,
            len = response.payload.len(),
            "Response received"
        );
        Ok(response.payload)
    }

    /// Picks the next free non-zero token.
    fn allocate_token(&self, pending: &HashMap<u8, PendingCall>) -> Result<u8, HostError> {
        if pending.len() >= MAX_PENDING {
            return Err(HostError::TooManyPending);
        }
        loop {
            let sn = self.next_sn.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if sn != 0 && !pending.contains_key(&sn) {
                return Ok(sn);
            }
        }
    }

    /// Reads frames, completes calls and dispatches notifies (call this in a
    /// background task). Returns once the link closes.
    pub async fn read_loop(&self) -> Result<(), HostError> {
        tracing::debug!("read_loop started");
        let mut reader = FrameReader::new(&self.bus);

        while let Some(next) = reader.next().await {
            let frame = match next {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Discarding malformed frame: {}", e);
                    continue;
                }
            };

            match frame.kind {
                FrameKind::Response => self.complete(frame).await,
                FrameKind::Notify => self.dispatch_notify(&frame),
                FrameKind::Request => {
                    tracing::debug!(command = %describe(frame.id), "Ignoring request from co-processor");
                }
            }
        }

        tracing::info!("Link to co-processor closed");
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the senders fails every waiter with ConnectionClosed.
        self.pending.lock().await.clear();
        self.drop_callbacks();
        Err(HostError::ConnectionClosed)
    }

    async fn complete(&self, frame: Frame) {
        let mut pending = self.pending.lock().await;
        match pending.get(&frame.sn) {
            None if frame.sn == 0 && frame.is_error_response() => {
                tracing::warn!(
                    status = ?frame.error_status(),
                    "Co-processor discarded a malformed frame"
                );
                return;
            }
            None => {
                tracing::debug!(
                    command = %describe(frame.id),
                    sn = frame.sn,
                    "No pending request for response"
                );
                return;
            }
            Some(call) if !frame.is_error_response() && call.command != frame.id => {
                tracing::debug!(
                    expected = %describe(call.command),
                    got = %describe(frame.id),
                    sn = frame.sn,
                    "Response does not match pending request"
                );
                return;
            }
            Some(_) => {}
        }

        if let Some(call) = pending.remove(&frame.sn) {
            // The caller may have given up already.
            let _ = call.tx.send(frame);
        }
    }

    fn dispatch_notify(&self, frame: &Frame) {
        match self.notify.dispatch(&self.ctx, frame.id, &frame.payload) {
            Ok(_) => {
                tracing::debug!(command = %describe(frame.id), len = frame.payload.len(), "Notify");
            }
            Err(Status::Unsupported) => {
                tracing::debug!(command = %describe(frame.id), "Unhandled notify");
            }
            Err(status) => {
                tracing::warn!(command = %describe(frame.id), %status, "Notify handler failed");
            }
        }
    }

    /// Completions cannot arrive once the link is gone.
    fn drop_callbacks(&self) {
        let dropped = self.ctx.callbacks.clear();
        if dropped > 0 {
            tracing::debug!("Dropped {} unfinished callbacks", dropped);
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), HostError> {
        tracing::debug!("Closing connection...");
        self.connected.store(false, Ordering::SeqCst);

        if self.bus.is_running() {
            self.bus.stop().await?;
        }

        let mut pending = self.pending.lock().await;
        tracing::debug!("Clearing {} pending requests", pending.len());
        pending.clear();
        drop(pending);
        self.drop_callbacks();

        tracing::debug!("Connection closed");
        Ok(())
    }

    /// Returns the number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.pending.try_lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.config.endpoint)
            .field("connected", &self.is_connected())
            .field("pending", &self.pending_count())
            .finish()
    }
}
