//! Notify handling on the host.
//!
//! Notifies from the co-processor resolve through a [`DispatchTable`] over a
//! [`NotifyContext`], the mirror image of the co-processor's command table.
//! Each handler decodes its payload, runs any callback the application
//! registered for it, and publishes a [`HostEvent`] to subscribers.

use bytes::Bytes;
use ncplink_protocol::message::{
    BindComplete, DeviceAnnounce, FindMatchComplete, FormationInfo, LeaveIndication, ScanComplete,
};
use ncplink_protocol::{Command, DispatchTable, HandlerResult, Status, UserCallback, WireFormat};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default capacity of the host event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// An asynchronous event reported by the co-processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    NetworkFormed(FormationInfo),
    DeviceJoined(DeviceAnnounce),
    PermitJoin { seconds: u8 },
    DeviceLeft(LeaveIndication),
    ScanComplete(ScanComplete),
    BindComplete(BindComplete),
    UnbindComplete(BindComplete),
    FindMatch(FindMatchComplete),
    ApsIndication(Bytes),
    ApsConfirm(Bytes),
    Zcl { command: Command, payload: Bytes },
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostEvent::NetworkFormed(info) => write!(
                f,
                "network formed: pan {:#06x}, extended pan {}, channel {}",
                info.pan_id, info.extended_pan_id, info.channel
            ),
            HostEvent::DeviceJoined(announce) => write!(
                f,
                "device joined: {:#06x} {} capability {:#04x}",
                announce.short_addr, announce.ieee_addr, announce.capability
            ),
            HostEvent::PermitJoin { seconds } => write!(f, "permit join: {}s", seconds),
            HostEvent::DeviceLeft(leave) => write!(
                f,
                "device left: {:#06x} {}{}",
                leave.short_addr,
                leave.ieee_addr,
                if leave.rejoin { " (rejoin)" } else { "" }
            ),
            HostEvent::ScanComplete(scan) => {
                write!(f, "scan complete: {} network(s)", scan.networks.len())?;
                for network in &scan.networks {
                    write!(
                        f,
                        "\n  pan {:#06x} channel {} extended pan {}{}",
                        network.pan_id,
                        network.logical_channel,
                        network.extended_pan_id,
                        if network.permit_joining {
                            " permit-join"
                        } else {
                            ""
                        }
                    )?;
                }
                Ok(())
            }
            HostEvent::BindComplete(bind) => write!(
                f,
                "bind complete: status {} context {:#x}",
                bind.status, bind.callback.context
            ),
            HostEvent::UnbindComplete(bind) => write!(
                f,
                "unbind complete: status {} context {:#x}",
                bind.status, bind.callback.context
            ),
            HostEvent::FindMatch(found) => write!(
                f,
                "match found: {:#06x} endpoint {} status {}",
                found.short_addr, found.endpoint, found.status
            ),
            HostEvent::ApsIndication(payload) => {
                write!(f, "aps indication: {}", hex::encode(payload))
            }
            HostEvent::ApsConfirm(payload) => write!(f, "aps confirm: {}", hex::encode(payload)),
            HostEvent::Zcl { command, payload } => {
                write!(f, "{}: {}", command, hex::encode(payload))
            }
        }
    }
}

/// A completion callback. Receives the event that carried its handle.
pub type Callback = Box<dyn FnOnce(&HostEvent) + Send>;

/// Maps callback handles carried in [`UserCallback`] records to closures.
///
/// Handles are non-zero; a record with handle 0 asks for no callback.
pub struct CallbackRegistry {
    next: AtomicU32,
    callbacks: Mutex<HashMap<u32, Callback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `callback` and returns the record to send with the request.
    ///
    /// Callbacks run on the connection's read loop, so no response is
    /// delivered until the callback returns. Hand long work off to a task.
    /// A callback whose completion never arrives is dropped when the link
    /// closes.
    pub fn register<F>(&self, context: u32, callback: F) -> UserCallback
    where
        F: FnOnce(&HostEvent) + Send + 'static,
    {
        let mut callbacks = self.callbacks.lock();
        let handle = loop {
            let handle = self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if handle != 0 && !callbacks.contains_key(&handle) {
                break handle;
            }
        };
        callbacks.insert(handle, Box::new(callback));
        UserCallback::new(handle, context)
    }

    /// Removes a callback without running it.
    pub fn cancel(&self, record: &UserCallback) -> bool {
        self.callbacks.lock().remove(&record.callback).is_some()
    }

    /// Runs and forgets the callback named by `record`. Returns whether one
    /// was registered.
    pub fn invoke(&self, record: &UserCallback, event: &HostEvent) -> bool {
        if !record.is_set() {
            return false;
        }
        // Released before the call so the callback may register again.
        let callback = self.callbacks.lock().remove(&record.callback);
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => {
                debug!(handle = record.callback, "No callback registered for handle");
                false
            }
        }
    }

    /// Drops every registered callback without running it. Returns how many
    /// were dropped.
    pub fn clear(&self) -> usize {
        let mut callbacks = self.callbacks.lock();
        let dropped = callbacks.len();
        callbacks.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("registered", &self.len())
            .finish()
    }
}

/// State shared by the notify handlers.
pub struct NotifyContext {
    events: broadcast::Sender<HostEvent>,
    pub callbacks: CallbackRegistry,
    network: Mutex<Option<FormationInfo>>,
}

impl NotifyContext {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            events,
            callbacks: CallbackRegistry::new(),
            network: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// The most recently formed network, if any.
    pub fn network(&self) -> Option<FormationInfo> {
        *self.network.lock()
    }

    fn emit(&self, event: HostEvent) -> HandlerResult {
        // No subscribers is fine.
        let _ = self.events.send(event);
        Ok(Bytes::new())
    }

    fn complete(&self, record: &UserCallback, event: HostEvent) -> HandlerResult {
        self.callbacks.invoke(record, &event);
        self.emit(event)
    }
}

impl Default for NotifyContext {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

fn decode<T: WireFormat>(command: Command, input: &[u8]) -> Result<T, Status> {
    T::from_bytes(input).map_err(|e| {
        warn!(%command, len = input.len(), "Undecodable notify payload: {}", e);
        Status::BadArgument
    })
}

fn formed(ctx: &NotifyContext, input: &[u8]) -> HandlerResult {
    let info = decode::<FormationInfo>(Command::NetworkFormNetwork, input)?;
    *ctx.network.lock() = Some(info);
    ctx.emit(HostEvent::NetworkFormed(info))
}

fn joined(ctx: &NotifyContext, input: &[u8]) -> HandlerResult {
    let announce = decode(Command::NetworkJoinNetwork, input)?;
    ctx.emit(HostEvent::DeviceJoined(announce))
}

fn permit_join(ctx: &NotifyContext, input: &[u8]) -> HandlerResult {
    let seconds = decode(Command::NetworkPermitJoining, input)?;
    ctx.emit(HostEvent::PermitJoin { seconds })
}

fn left(ctx: &NotifyContext, input: &[u8]) -> HandlerResult {
    let leave = decode(Command::NetworkLeaveNetwork, input)?;
    ctx.emit(HostEvent::DeviceLeft(leave))
}

fn scan_complete(ctx: &NotifyContext, input: &[u8]) -> HandlerResult {
    let scan = decode(Command::NetworkScanCompleteHandler, input)?;
    ctx.emit(HostEvent::ScanComplete(scan))
}

fn bind_complete(ctx: &NotifyContext, input: &[u8]) -> HandlerResult {
    let bind: BindComplete = decode(Command::ZdoBindSet, input)?;
    ctx.complete(&bind.callback, HostEvent::BindComplete(bind))
}

fn unbind_complete(ctx: &NotifyContext, input: &[u8]) -> HandlerResult {
    let bind: BindComplete = decode(Command::ZdoUnbindSet, input)?;
    ctx.complete(&bind.callback, HostEvent::UnbindComplete(bind))
}

fn find_match(ctx: &NotifyContext, input: &[u8]) -> HandlerResult {
    let found: FindMatchComplete = decode(Command::ZdoFindMatch, input)?;
    ctx.complete(&found.callback, HostEvent::FindMatch(found))
}

/// Builds the host notify table.
pub fn notify_table() -> DispatchTable<NotifyContext> {
    let builder = DispatchTable::builder()
        .register(Command::NetworkFormNetwork, formed)
        .register(Command::NetworkJoinNetwork, joined)
        .register(Command::NetworkPermitJoining, permit_join)
        .register(Command::NetworkLeaveNetwork, left)
        .register(Command::NetworkScanCompleteHandler, scan_complete)
        .register(Command::ZdoBindSet, bind_complete)
        .register(Command::ZdoUnbindSet, unbind_complete)
        .register(Command::ZdoFindMatch, find_match)
        .register(
            Command::ApsDataIndication,
            |ctx: &NotifyContext, input: &[u8]| {
                ctx.emit(HostEvent::ApsIndication(Bytes::copy_from_slice(input)))
            },
        )
        .register(Command::ApsDataConfirm, |ctx: &NotifyContext, input: &[u8]| {
            ctx.emit(HostEvent::ApsConfirm(Bytes::copy_from_slice(input)))
        });

    Command::ALL
        .iter()
        .copied()
        .filter(|c| c.is_zcl_passthrough())
        .fold(builder, |builder, command| {
            builder.register(command, move |ctx: &NotifyContext, input: &[u8]| {
                ctx.emit(HostEvent::Zcl {
                    command,
                    payload: Bytes::copy_from_slice(input),
                })
            })
        })
        .build()
}
