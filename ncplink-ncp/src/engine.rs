//! Protocol engine seam.
//!
//! Handlers hand requests to a [`ProtocolEngine`] and return at once. The
//! engine reports what happened later through an [`EventSink`], and the run
//! loop turns every [`EngineEvent`] into a notify frame.

use bytes::Bytes;
use ncplink_protocol::message::{
    BindComplete, DeviceAnnounce, FindMatchComplete, FindMatchRequest, FormNetworkParams,
    FormationInfo, LeaveIndication, ScanComplete, ScanRequest,
};
use ncplink_protocol::{Command, Status, UserCallback, WireFormat};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A request handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineRequest {
    PlatformInit,
    Start { autostart: bool },
    FormNetwork(FormNetworkParams),
    PermitJoin { seconds: u8 },
    Leave,
    StartScan(ScanRequest),
    StopScan,
    Zcl { command: Command, payload: Bytes },
    Bind { body: Bytes, callback: UserCallback },
    Unbind { body: Bytes, callback: UserCallback },
    FindMatch(FindMatchRequest),
    ApsData(Bytes),
}

impl EngineRequest {
    pub fn name(&self) -> &'static str {
        match self {
            EngineRequest::PlatformInit => "platform_init",
            EngineRequest::Start { .. } => "start",
            EngineRequest::FormNetwork(_) => "form_network",
            EngineRequest::PermitJoin { .. } => "permit_join",
            EngineRequest::Leave => "leave",
            EngineRequest::StartScan(_) => "start_scan",
            EngineRequest::StopScan => "stop_scan",
            EngineRequest::Zcl { .. } => "zcl",
            EngineRequest::Bind { .. } => "bind",
            EngineRequest::Unbind { .. } => "unbind",
            EngineRequest::FindMatch(_) => "find_match",
            EngineRequest::ApsData(_) => "aps_data",
        }
    }
}

/// An asynchronous stack event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Formation(FormationInfo),
    PermitJoin { seconds: u8 },
    DeviceAnnounce(DeviceAnnounce),
    Leave(LeaveIndication),
    ScanComplete(ScanComplete),
    BindComplete(BindComplete),
    UnbindComplete(BindComplete),
    FindMatchComplete(FindMatchComplete),
    Zcl { command: Command, payload: Bytes },
    ApsIndication(Bytes),
    ApsConfirm(Bytes),
}

impl EngineEvent {
    /// Command identifier the event travels under.
    pub fn command(&self) -> Command {
        match self {
            EngineEvent::Formation(_) => Command::NetworkFormNetwork,
            EngineEvent::PermitJoin { .. } => Command::NetworkPermitJoining,
            EngineEvent::DeviceAnnounce(_) => Command::NetworkJoinNetwork,
            EngineEvent::Leave(_) => Command::NetworkLeaveNetwork,
            EngineEvent::ScanComplete(_) => Command::NetworkScanCompleteHandler,
            EngineEvent::BindComplete(_) => Command::ZdoBindSet,
            EngineEvent::UnbindComplete(_) => Command::ZdoUnbindSet,
            EngineEvent::FindMatchComplete(_) => Command::ZdoFindMatch,
            EngineEvent::Zcl { command, .. } => *command,
            EngineEvent::ApsIndication(_) => Command::ApsDataIndication,
            EngineEvent::ApsConfirm(_) => Command::ApsDataConfirm,
        }
    }

    /// Serialized notify payload.
    pub fn payload(&self) -> Bytes {
        match self {
            EngineEvent::Formation(info) => info.to_bytes(),
            EngineEvent::PermitJoin { seconds } => Bytes::copy_from_slice(&[*seconds]),
            EngineEvent::DeviceAnnounce(announce) => announce.to_bytes(),
            EngineEvent::Leave(leave) => leave.to_bytes(),
            EngineEvent::ScanComplete(scan) => scan.to_bytes(),
            EngineEvent::BindComplete(bind) | EngineEvent::UnbindComplete(bind) => {
                bind.to_bytes()
            }
            EngineEvent::FindMatchComplete(found) => found.to_bytes(),
            EngineEvent::Zcl { payload, .. }
            | EngineEvent::ApsIndication(payload)
            | EngineEvent::ApsConfirm(payload) => payload.clone(),
        }
    }
}

/// The network stack collaborator.
pub trait ProtocolEngine: Send + Sync {
    /// Submits a request. The returned status only says whether the request
    /// was accepted; results arrive as events.
    fn submit(&self, request: EngineRequest) -> Status;
}

/// Producer side of the engine event queue.
///
/// Never waits: when the queue is full the event is dropped and counted.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Creates a sink and the receiver the run loop drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Queues an event. Returns false when it was dropped.
    pub fn emit(&self, event: EngineEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(command = %event.command(), "Engine event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(command = %event.command(), "No run loop listening, dropping event");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("capacity", &self.tx.max_capacity())
            .field("dropped", &self.dropped())
            .finish()
    }
}
