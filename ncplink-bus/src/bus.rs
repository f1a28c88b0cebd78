//! Bus handle: two bounded byte queues plus the tasks that move bytes
//! between them and the physical link.
//!
//! ```text
//!            receive task                     consumer
//!  link ──► try_push ──► [ inbound ] ──► Bus::recv / FrameReader
//!
//!            producer                      transmit task
//!  Bus::output ──► [ outbound ] ──► pop ──► write_all ──► link
//! ```
//!
//! The receive task never waits on the inbound queue. When it is full the
//! chunk is dropped and counted. Producers of outbound bytes wait up to the
//! configured output timeout and then get [`BusError::Backpressure`].

use crate::error::BusError;
use crate::queue::ByteQueue;
use bytes::Bytes;
use ncplink_protocol::Frame;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default capacity of each byte queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20 * 1024;

/// Default bound on how long `output` waits for outbound space.
pub const DEFAULT_OUTPUT_TIMEOUT: Duration = Duration::from_millis(50);

/// Default size of a single link read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

const MIN_READ_BUFFER_SIZE: usize = 64;
const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Grace period granted to each task when the bus stops.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Physical line settings.
///
/// These are handed through to whatever owns the physical port. The bus
/// itself only logs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialParams {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: String,
    pub stop_bits: u8,
    pub flow_control: bool,
    pub tx_pin: Option<u32>,
    pub rx_pin: Option<u32>,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: 8,
            parity: "none".to_string(),
            stop_bits: 1,
            flow_control: false,
            tx_pin: None,
            rx_pin: None,
        }
    }
}

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    pub output_timeout: Duration,
    pub read_buffer_size: usize,
    pub serial: SerialParams,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_QUEUE_CAPACITY,
            outbound_capacity: DEFAULT_QUEUE_CAPACITY,
            output_timeout: DEFAULT_OUTPUT_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            serial: SerialParams::default(),
        }
    }
}

impl BusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, inbound: usize, outbound: usize) -> Self {
        self.inbound_capacity = inbound;
        self.outbound_capacity = outbound;
        self
    }

    pub fn with_output_timeout(mut self, timeout: Duration) -> Self {
        self.output_timeout = timeout;
        self
    }

    /// Sets the link read size, clamped to 64 bytes .. 64 KiB.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_serial(mut self, serial: SerialParams) -> Self {
        self.serial = serial;
        self
    }
}

/// Byte counters for one bus.
#[derive(Debug, Default)]
pub struct BusStats {
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_dropped: AtomicU64,
    pub backpressure_events: AtomicU64,
}

impl BusStats {
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped.load(Ordering::Relaxed)
    }

    pub fn backpressure_events(&self) -> u64 {
        self.backpressure_events.load(Ordering::Relaxed)
    }
}

/// A configured link endpoint.
///
/// Created with [`Bus::init`], bound to a transport with [`Bus::start`] and
/// released with [`Bus::deinit`]. A stopped bus can be started again on a
/// new transport.
pub struct Bus {
    config: BusConfig,
    inbound: Arc<ByteQueue>,
    outbound: Arc<ByteQueue>,
    /// Serializes producers of the inbound queue.
    producer: Arc<Mutex<()>>,
    stats: Arc<BusStats>,
    running: AtomicBool,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bus {
    /// Allocates both queues.
    ///
    /// Fails with [`BusError::OutOfMemory`] when either queue cannot be
    /// allocated; anything allocated so far is released on return.
    pub fn init(config: BusConfig) -> Result<Self, BusError> {
        let inbound = ByteQueue::with_capacity(config.inbound_capacity)?;
        let outbound = ByteQueue::with_capacity(config.outbound_capacity)?;
        let (shutdown, _) = broadcast::channel(1);

        debug!(
            inbound = config.inbound_capacity,
            outbound = config.outbound_capacity,
            baud = config.serial.baud_rate,
            data_bits = config.serial.data_bits,
            parity = %config.serial.parity,
            stop_bits = config.serial.stop_bits,
            flow_control = config.serial.flow_control,
            "Bus initialized"
        );

        Ok(Self {
            config,
            inbound: Arc::new(inbound),
            outbound: Arc::new(outbound),
            producer: Arc::new(Mutex::new(())),
            stats: Arc::new(BusStats::default()),
            running: AtomicBool::new(false),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the receive and transmit tasks over `transport`.
    pub fn start<T>(&self, transport: T) -> Result<(), BusError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BusError::AlreadyStarted);
        }

        self.inbound.reopen();
        self.outbound.reopen();

        let (reader, writer) = tokio::io::split(transport);

        let rx = tokio::spawn(receive_loop(
            reader,
            self.inbound.clone(),
            self.producer.clone(),
            self.stats.clone(),
            self.config.read_buffer_size,
            self.shutdown.subscribe(),
        ));
        let tx = tokio::spawn(transmit_loop(
            writer,
            self.outbound.clone(),
            self.stats.clone(),
            self.shutdown.subscribe(),
        ));

        self.tasks.lock().extend([rx, tx]);
        info!("Bus started");
        Ok(())
    }

    /// Signals both tasks to exit and waits for them.
    ///
    /// Bytes already queued for output are flushed first. Bytes already
    /// received stay readable through [`Bus::recv`].
    pub async fn stop(&self) -> Result<(), BusError> {
        if !self.is_running() {
            return Err(BusError::NotStarted);
        }

        let _ = self.shutdown.send(());
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks {
            match tokio::time::timeout(STOP_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Bus task failed: {}", e),
                Err(_) => {
                    warn!("Bus task did not stop within {:?}, aborting", STOP_GRACE);
                    task.abort();
                }
            }
        }

        self.inbound.close();
        self.outbound.close();
        self.running.store(false, Ordering::SeqCst);
        info!("Bus stopped");
        Ok(())
    }

    /// Queues bytes for transmission.
    ///
    /// Waits at most the configured output timeout for space, then fails
    /// with [`BusError::Backpressure`]. Nothing is queued on failure.
    pub async fn output(&self, data: &[u8]) -> Result<(), BusError> {
        let result = self
            .outbound
            .push_timeout(data, self.config.output_timeout)
            .await;
        if let Err(BusError::Backpressure { len, free, .. }) = &result {
            self.stats
                .backpressure_events
                .fetch_add(1, Ordering::Relaxed);
            warn!(len, free, "Outbound queue backpressure");
        }
        result
    }

    /// Encodes `frame` and queues it for transmission.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), BusError> {
        let encoded = frame.encode()?;
        trace!(frame = %frame, len = encoded.len(), "Queueing frame");
        self.output(&encoded).await
    }

    /// Feeds bytes into the inbound queue as if they came off the link.
    pub fn inject(&self, data: &[u8]) -> Result<(), BusError> {
        let _guard = self.producer.lock();
        self.inbound.try_push(data)
    }

    /// Waits for received bytes. Returns `None` once the link has closed
    /// and everything received has been consumed.
    pub async fn recv(&self) -> Option<Bytes> {
        self.inbound.pop().await
    }

    /// Stops the bus if it is running and releases both queues.
    pub async fn deinit(self) -> Result<(), BusError> {
        if self.is_running() {
            self.stop().await?;
        }
        self.inbound.close();
        self.outbound.close();
        debug!("Bus released");
        Ok(())
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            let _ = self.shutdown.send(());
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("running", &self.is_running())
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .finish()
    }
}

async fn receive_loop<R>(
    mut reader: R,
    inbound: Arc<ByteQueue>,
    producer: Arc<Mutex<()>>,
    stats: Arc<BusStats>,
    buffer_size: usize,
    mut shutdown: broadcast::Receiver<()>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size];

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("Receive loop stopping");
                break;
            }

            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    info!("Link closed by peer");
                    break;
                }
                Ok(n) => {
                    stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                    let pushed = {
                        let _guard = producer.lock();
                        inbound.try_push(&buf[..n])
                    };
                    if let Err(e) = pushed {
                        stats.bytes_dropped.fetch_add(n as u64, Ordering::Relaxed);
                        warn!(dropped = n, "Inbound overflow: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Link read error: {}", e);
                    break;
                }
            }
        }
    }

    inbound.close();
}

async fn transmit_loop<W>(
    mut writer: W,
    outbound: Arc<ByteQueue>,
    stats: Arc<BusStats>,
    mut shutdown: broadcast::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            chunk = outbound.pop() => match chunk {
                Some(bytes) => {
                    if let Err(e) = write_chunk(&mut writer, &bytes, &stats).await {
                        warn!("Link write error: {}", e);
                        break;
                    }
                }
                None => break,
            },

            _ = shutdown.recv() => {
                while let Some(bytes) = outbound.try_pop() {
                    if let Err(e) = write_chunk(&mut writer, &bytes, &stats).await {
                        warn!("Link write error during drain: {}", e);
                        break;
                    }
                }
                debug!("Transmit loop stopping");
                break;
            }
        }
    }

    outbound.close();
    let _ = writer.shutdown().await;
}

async fn write_chunk<W>(writer: &mut W, bytes: &[u8], stats: &BusStats) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    stats
        .bytes_sent
        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
    Ok(())
}
