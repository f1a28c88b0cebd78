//! Co-processor run loop.

use crate::config::Config;
use crate::engine::{EngineEvent, EventSink, ProtocolEngine};
use crate::error::NcpError;
use crate::handler::{ApsKind, CommandHandler, Delivery, NcpContext};
use crate::metrics::Metrics;
use crate::sim::SimulatedEngine;
use crate::state::NetworkStore;
use ncplink_bus::{Bus, BusError, FrameReader, LinkStream};
use ncplink_protocol::command::describe;
use ncplink_protocol::{Frame, FrameKind, NetworkState, ProtocolError, Status};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

/// Run loop statistics.
#[derive(Debug, Default)]
pub struct NcpStats {
    pub links_total: AtomicU64,
    pub requests_total: AtomicU64,
    pub responses_total: AtomicU64,
    pub notifies_total: AtomicU64,
    pub malformed_total: AtomicU64,
    pub unsupported_total: AtomicU64,
}

/// The co-processor: one bus, one command table, one engine.
///
/// A single host link is served at a time. Engine events produced while no
/// host is attached wait in the event queue until the next link.
pub struct Ncp {
    bus: Bus,
    handler: Arc<CommandHandler>,
    events: Mutex<mpsc::Receiver<EngineEvent>>,
    stats: NcpStats,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    metrics: Option<Arc<Metrics>>,
    notify_sn: AtomicU8,
    drops_reported: AtomicU64,
}

impl Ncp {
    /// Creates a co-processor backed by the simulated engine.
    pub fn new(config: &Config, metrics: Option<Arc<Metrics>>) -> Result<Self, NcpError> {
        Self::with_engine(config, metrics, |store, sink| {
            let engine: Arc<dyn ProtocolEngine> = Arc::new(SimulatedEngine::new(store, sink));
            engine
        })
    }

    /// Creates a co-processor around the engine returned by `build`.
    ///
    /// `build` receives the shared network store and the sink the engine
    /// reports its events through.
    pub fn with_engine<F>(
        config: &Config,
        metrics: Option<Arc<Metrics>>,
        build: F,
    ) -> Result<Self, NcpError>
    where
        F: FnOnce(Arc<NetworkStore>, EventSink) -> Arc<dyn ProtocolEngine>,
    {
        config.validate()?;

        let bus = Bus::init(config.bus.bus_config(&config.link.serial))?;
        let store = Arc::new(NetworkStore::new(config.network.clone()));
        let (sink, events) = EventSink::channel(config.bus.event_queue_len);
        let engine = build(store.clone(), sink);

        let ctx = NcpContext::new(store, engine).with_mailbox_depth(config.bus.aps_mailbox_depth);
        let mut handler = CommandHandler::new(ctx);
        if let Some(ref metrics) = metrics {
            handler = handler.with_metrics(metrics.clone());
        }

        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            bus,
            handler: Arc::new(handler),
            events: Mutex::new(events),
            stats: NcpStats::default(),
            shutdown,
            running: AtomicBool::new(false),
            metrics,
            notify_sn: AtomicU8::new(0),
            drops_reported: AtomicU64::new(0),
        })
    }

    pub fn handler(&self) -> &CommandHandler {
        &self.handler
    }

    pub fn store(&self) -> &NetworkStore {
        &self.handler.context().store
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Returns run loop statistics.
    pub fn stats(&self) -> &NcpStats {
        &self.stats
    }

    /// Returns whether the TCP accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Initiates shutdown of the link being served and the accept loop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Receiver that fires when [`Ncp::shutdown`] is called.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Serves one host link until it closes or shutdown is requested.
    pub async fn serve<T>(&self, transport: T) -> Result<(), NcpError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut events = self
            .events
            .try_lock()
            .map_err(|_| NcpError::AlreadyServing)?;

        self.handler.context().mailbox.reset();
        let mut shutdown_rx = self.shutdown.subscribe();
        self.bus.start(transport)?;
        self.stats.links_total.fetch_add(1, Ordering::Relaxed);
        if let Some(ref metrics) = self.metrics {
            metrics.link_connected.set(1.0);
        }

        let mut reader = FrameReader::new(&self.bus);
        let result = loop {
            let step = tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received");
                    break Ok(());
                }

                Some(event) = events.recv() => self.forward_event(event).await,

                next = reader.next() => match next {
                    Some(Ok(frame)) => self.on_frame(frame).await,
                    Some(Err(e)) => self.on_malformed(e).await,
                    None => {
                        info!("Host link closed");
                        break Ok(());
                    }
                },
            };

            if let Err(e) = step {
                break Err(e);
            }
        };

        if self.bus.is_running() {
            if let Err(e) = self.bus.stop().await {
                warn!("Failed to stop bus: {}", e);
            }
        }
        self.report_drops();
        if let Some(ref metrics) = self.metrics {
            metrics.link_connected.set(0.0);
        }

        result
    }

    /// Serves a serial device or pty.
    pub async fn serve_device(&self, path: impl AsRef<Path>) -> Result<(), NcpError> {
        let path = path.as_ref();
        let stream = LinkStream::open_device(path).await?;
        info!("Serving device {}", path.display());
        self.serve(stream).await
    }

    /// Accepts host connections one after another until shutdown.
    pub async fn serve_tcp(&self, listener: TcpListener) -> Result<(), NcpError> {
        self.running.store(true, Ordering::SeqCst);
        info!("Co-processor listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!("Host connected: {}", addr);
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
                            }
                            if let Err(e) = self.serve(LinkStream::from(stream)).await {
                                warn!("[{}] Link error: {}", addr, e);
                            }
                            info!("Host disconnected: {}", addr);
                        }
                        Err(e) => {
                            warn!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Co-processor shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn on_frame(&self, frame: Frame) -> Result<(), NcpError> {
        if let Some(ref metrics) = self.metrics {
            metrics
                .frames_received_total
                .with_label_values(&[kind_label(frame.kind)])
                .inc();
        }

        match frame.kind {
            FrameKind::Request => {
                self.stats.requests_total.fetch_add(1, Ordering::Relaxed);
                let response = self.handler.handle(&frame);
                if response.error_status() == Some(Status::Unsupported) {
                    self.stats.unsupported_total.fetch_add(1, Ordering::Relaxed);
                }
                self.send(&response).await
            }
            FrameKind::Response | FrameKind::Notify => {
                debug!(
                    command = %describe(frame.id),
                    kind = %frame.kind,
                    "Ignoring non-request frame from host"
                );
                Ok(())
            }
        }
    }

    async fn on_malformed(&self, error: ProtocolError) -> Result<(), NcpError> {
        self.stats.malformed_total.fetch_add(1, Ordering::Relaxed);
        if let Some(ref metrics) = self.metrics {
            metrics.malformed_frames_total.inc();
        }
        warn!("Discarding malformed frame: {}", error);
        self.send(&Frame::error_response(0, Status::BadArgument))
            .await
    }

    async fn forward_event(&self, event: EngineEvent) -> Result<(), NcpError> {
        let ctx = self.handler.context();

        match &event {
            EngineEvent::Formation(info) => ctx.store.apply_formation(info),
            EngineEvent::DeviceAnnounce(announce) => ctx.store.record_announce(announce),
            EngineEvent::Leave(leave) => {
                if leave.ieee_addr == ctx.store.read(|p| p.ieee_addr) {
                    ctx.store.set_state(NetworkState::Offline);
                } else {
                    ctx.store.remove_neighbor(leave.short_addr);
                }
            }
            EngineEvent::ApsIndication(payload) => {
                if ctx.mailbox.offer(ApsKind::Indication, payload.clone()) != Delivery::Notify {
                    return Ok(());
                }
            }
            EngineEvent::ApsConfirm(payload) => {
                if ctx.mailbox.offer(ApsKind::Confirm, payload.clone()) != Delivery::Notify {
                    return Ok(());
                }
            }
            _ => {}
        }

        let frame = Frame::notify(event.command(), self.next_notify_sn(), event.payload());
        self.send(&frame).await
    }

    /// Queues a frame for the host. Backpressure drops the frame rather
    /// than the link.
    async fn send(&self, frame: &Frame) -> Result<(), NcpError> {
        match self.bus.send_frame(frame).await {
            Ok(()) => {}
            Err(BusError::Backpressure { .. }) => {
                warn!(command = %describe(frame.id), sn = frame.sn, "Dropping outbound frame");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let counter = match frame.kind {
            FrameKind::Notify => &self.stats.notifies_total,
            _ => &self.stats.responses_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(ref metrics) = self.metrics {
            metrics
                .frames_sent_total
                .with_label_values(&[kind_label(frame.kind)])
                .inc();
        }
        Ok(())
    }

    /// Sequence numbers for unsolicited frames. Zero is reserved for
    /// malformed-frame notices.
    fn next_notify_sn(&self) -> u8 {
        loop {
            let sn = self
                .notify_sn
                .fetch_add(1, Ordering::Relaxed)
                .wrapping_add(1);
            if sn != 0 {
                return sn;
            }
        }
    }

    fn report_drops(&self) {
        let total = self.bus.stats().bytes_dropped();
        let previous = self.drops_reported.swap(total, Ordering::Relaxed);
        if let Some(ref metrics) = self.metrics {
            metrics
                .bus_dropped_bytes_total
                .inc_by(total.saturating_sub(previous) as f64);
        }
    }
}

impl std::fmt::Debug for Ncp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ncp")
            .field("bus", &self.bus)
            .field("running", &self.is_running())
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

fn kind_label(kind: FrameKind) -> &'static str {
    match kind {
        FrameKind::Request => "request",
        FrameKind::Response => "response",
        FrameKind::Notify => "notify",
    }
}
