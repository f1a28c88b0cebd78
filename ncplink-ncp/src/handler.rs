//! Command handlers.
//!
//! Every request the host can send resolves through one read-only
//! [`DispatchTable`]. Handlers are plain functions of the shared
//! [`NcpContext`] and the request payload; anything asynchronous is handed
//! to the protocol engine and comes back later as an event.

use crate::engine::{EngineRequest, ProtocolEngine};
use crate::metrics::Metrics;
use crate::state::{NetworkParams, NetworkStore};
use bytes::Bytes;
use ncplink_protocol::command::describe;
use ncplink_protocol::message::{
    split_bind_request, EndpointDescriptor, FindMatchRequest, FormNetworkParams, LinkKeyInfo,
    ScanRequest, UNKNOWN_SHORT_ADDR,
};
use ncplink_protocol::{
    Command, DeviceRole, DispatchTable, Frame, HandlerResult, IeeeAddr, SecurityMode, Status,
    WireFormat,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default depth of each APS mailbox.
pub const DEFAULT_MAILBOX_DEPTH: usize = 60;

/// Which APS event stream a mailbox slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApsKind {
    Indication,
    Confirm,
}

/// What became of an APS event offered to the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The host has never polled; send it as a notify.
    Notify,
    /// Held until the host polls.
    Queued,
    /// Mailbox full.
    Dropped,
}

#[derive(Default)]
struct Slot {
    polled: bool,
    queue: VecDeque<Bytes>,
}

/// Holds APS events for hosts that poll for them.
pub struct ApsMailbox {
    depth: usize,
    indications: Mutex<Slot>,
    confirms: Mutex<Slot>,
}

impl ApsMailbox {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            indications: Mutex::new(Slot::default()),
            confirms: Mutex::new(Slot::default()),
        }
    }

    fn slot(&self, kind: ApsKind) -> &Mutex<Slot> {
        match kind {
            ApsKind::Indication => &self.indications,
            ApsKind::Confirm => &self.confirms,
        }
    }

    /// Offers an event from the engine.
    pub fn offer(&self, kind: ApsKind, payload: Bytes) -> Delivery {
        let mut slot = self.slot(kind).lock();
        if !slot.polled {
            return Delivery::Notify;
        }
        if slot.queue.len() >= self.depth {
            warn!(?kind, depth = self.depth, "APS mailbox full, dropping event");
            return Delivery::Dropped;
        }
        slot.queue.push_back(payload);
        Delivery::Queued
    }

    /// Takes the oldest queued event. From now on events of this kind are
    /// queued instead of notified.
    pub fn poll(&self, kind: ApsKind) -> Option<Bytes> {
        let mut slot = self.slot(kind).lock();
        slot.polled = true;
        slot.queue.pop_front()
    }

    pub fn len(&self, kind: ApsKind) -> usize {
        self.slot(kind).lock().queue.len()
    }

    /// Forgets queued events and the polling mode, as for a new host.
    pub fn reset(&self) {
        for kind in [ApsKind::Indication, ApsKind::Confirm] {
            let mut slot = self.slot(kind).lock();
            slot.polled = false;
            slot.queue.clear();
        }
    }
}

impl Default for ApsMailbox {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_DEPTH)
    }
}

/// State shared by all handlers.
pub struct NcpContext {
    pub store: Arc<NetworkStore>,
    pub engine: Arc<dyn ProtocolEngine>,
    pub mailbox: ApsMailbox,
    initialized: AtomicBool,
}

impl NcpContext {
    pub fn new(store: Arc<NetworkStore>, engine: Arc<dyn ProtocolEngine>) -> Self {
        Self {
            store,
            engine,
            mailbox: ApsMailbox::default(),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_mailbox_depth(mut self, depth: usize) -> Self {
        self.mailbox = ApsMailbox::new(depth);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

/// Resolves requests to responses.
pub struct CommandHandler {
    ctx: NcpContext,
    table: DispatchTable<NcpContext>,
    metrics: Option<Arc<Metrics>>,
}

impl CommandHandler {
    /// Creates a new command handler.
    pub fn new(ctx: NcpContext) -> Self {
        Self {
            ctx,
            table: command_table(),
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn context(&self) -> &NcpContext {
        &self.ctx
    }

    pub fn table(&self) -> &DispatchTable<NcpContext> {
        &self.table
    }

    /// Runs the handler registered for `id`.
    pub fn dispatch(&self, id: u16, input: &[u8]) -> HandlerResult {
        self.table.dispatch(&self.ctx, id, input)
    }

    /// Handles a request frame and returns the response to send.
    ///
    /// Failures become the error response, carrying the request's
    /// sequence number.
    pub fn handle(&self, request: &Frame) -> Frame {
        let name = command_label(request.id);
        let timer = self
            .metrics
            .as_ref()
            .map(|m| m.request_duration.with_label_values(&[name]).start_timer());

        let result = self.dispatch(request.id, &request.payload);

        if let Some(ref metrics) = self.metrics {
            metrics.requests_total.with_label_values(&[name]).inc();
            if let Err(status) = result {
                metrics
                    .dispatch_errors_total
                    .with_label_values(&[status_label(status)])
                    .inc();
            }
        }
        drop(timer);

        match result {
            Ok(payload) => {
                debug!(
                    command = %describe(request.id),
                    sn = request.sn,
                    in_len = request.payload.len(),
                    out_len = payload.len(),
                    "Request handled"
                );
                Frame::response(request.id, request.sn, payload)
            }
            Err(Status::Unsupported) => {
                warn!(command = %describe(request.id), "Unsupported command");
                Frame::error_response(request.sn, Status::Unsupported)
            }
            Err(status) => {
                debug!(
                    command = %describe(request.id),
                    sn = request.sn,
                    %status,
                    "Request failed"
                );
                Frame::error_response(request.sn, status)
            }
        }
    }
}

fn command_label(id: u16) -> &'static str {
    Command::from_id(id).map(Command::name).unwrap_or("UNKNOWN")
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Success => "SUCCESS",
        Status::Fatal => "FATAL",
        Status::BadArgument => "BAD_ARGUMENT",
        Status::NoMemory => "NO_MEMORY",
        Status::Unsupported => "UNSUPPORTED",
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn reply(status: Status) -> HandlerResult {
    Ok(Bytes::copy_from_slice(&[status.as_u8()]))
}

fn expect_len(input: &[u8], len: usize) -> Result<(), Status> {
    if input.len() != len {
        return Err(Status::BadArgument);
    }
    Ok(())
}

fn expect_some(input: &[u8]) -> Result<(), Status> {
    if input.is_empty() {
        return Err(Status::BadArgument);
    }
    Ok(())
}

fn decode<T: WireFormat>(input: &[u8]) -> Result<T, Status> {
    T::from_bytes(input).map_err(|_| Status::BadArgument)
}

fn submit(ctx: &NcpContext, request: EngineRequest) -> HandlerResult {
    reply(ctx.engine.submit(request))
}

fn get_param<T: WireFormat>(
    ctx: &NcpContext,
    input: &[u8],
    get: impl FnOnce(&NetworkParams) -> T,
) -> HandlerResult {
    expect_len(input, 0)?;
    Ok(ctx.store.read(get).to_bytes())
}

fn set_param<T: WireFormat>(
    ctx: &NcpContext,
    input: &[u8],
    set: impl FnOnce(&mut NetworkParams, T),
) -> HandlerResult {
    let value = decode::<T>(input)?;
    ctx.store.update(|p| set(p, value));
    reply(Status::Success)
}

// ============================================================================
// Network lifecycle
// ============================================================================

fn network_init(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    expect_len(input, 0)?;
    if ctx.initialized.swap(true, Ordering::SeqCst) {
        return reply(Status::Fatal);
    }
    submit(ctx, EngineRequest::PlatformInit)
}

fn network_start(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let autostart = decode::<bool>(input)?;
    submit(ctx, EngineRequest::Start { autostart })
}

fn network_state(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    expect_len(input, 0)?;
    Ok(Bytes::copy_from_slice(&[ctx.store.state() as u8]))
}

fn stack_status(_ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    expect_some(input)?;
    reply(Status::Success)
}

fn form_network(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let params = decode::<FormNetworkParams>(input)?;
    ctx.store.update(|p| p.role = params.role);
    submit(ctx, EngineRequest::FormNetwork(params))
}

fn permit_joining(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let seconds = decode::<u8>(input)?;
    submit(ctx, EngineRequest::PermitJoin { seconds })
}

fn leave_network(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    expect_len(input, 0)?;
    ctx.store.set_state(ncplink_protocol::NetworkState::Leaving);
    submit(ctx, EngineRequest::Leave)
}

fn start_scan(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let request = decode::<ScanRequest>(input)?;
    submit(ctx, EngineRequest::StartScan(request))
}

fn scan_complete(_ctx: &NcpContext, _input: &[u8]) -> HandlerResult {
    Ok(Bytes::new())
}

fn stop_scan(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    expect_len(input, 0)?;
    submit(ctx, EngineRequest::StopScan)
}

// ============================================================================
// Parameters with extra rules
// ============================================================================

fn role_set(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let role = DeviceRole::try_from(decode::<u8>(input)?).map_err(|_| Status::BadArgument)?;
    ctx.store.update(|p| p.role = role);
    reply(Status::Success)
}

fn secure_mode_set(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let mode = SecurityMode::try_from(decode::<u8>(input)?).map_err(|_| Status::BadArgument)?;
    ctx.store.update(|p| p.security_mode = mode);
    reply(Status::Success)
}

fn link_key_get(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    get_param(ctx, input, |p| LinkKeyInfo {
        ieee_addr: p.ieee_addr,
        key: p.link_key,
    })
}

fn predefined_pan_id(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let enabled = decode::<bool>(input)?;
    ctx.store.update(|p| p.use_predefined_pan_id = enabled);
    reply(Status::Success)
}

fn short_to_ieee(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let short_addr = decode::<u16>(input)?;
    let ieee = ctx.store.ieee_of(short_addr).unwrap_or(IeeeAddr::UNKNOWN);
    Ok(ieee.to_bytes())
}

fn ieee_to_short(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let ieee = decode::<IeeeAddr>(input)?;
    let short_addr = ctx.store.short_of(&ieee).unwrap_or(UNKNOWN_SHORT_ADDR);
    Ok(short_addr.to_bytes())
}

// ============================================================================
// Cluster library
// ============================================================================

fn endpoint_add(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let descriptor = decode::<EndpointDescriptor>(input)?;
    let endpoint = descriptor.endpoint;
    if ctx.store.add_endpoint(descriptor) {
        debug!(endpoint, "Endpoint re-registered");
    }
    reply(Status::Success)
}

fn endpoint_del(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let endpoint = decode::<u8>(input)?;
    match ctx.store.remove_endpoint(endpoint) {
        Some(_) => reply(Status::Success),
        None => Err(Status::BadArgument),
    }
}

fn zcl_request(ctx: &NcpContext, command: Command, input: &[u8]) -> HandlerResult {
    expect_some(input)?;
    submit(
        ctx,
        EngineRequest::Zcl {
            command,
            payload: Bytes::copy_from_slice(input),
        },
    )
}

// ============================================================================
// Device objects
// ============================================================================

fn bind_set(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let (body, callback) = split_bind_request(input).map_err(|_| Status::BadArgument)?;
    submit(
        ctx,
        EngineRequest::Bind {
            body: Bytes::copy_from_slice(body),
            callback,
        },
    )
}

fn unbind_set(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let (body, callback) = split_bind_request(input).map_err(|_| Status::BadArgument)?;
    submit(
        ctx,
        EngineRequest::Unbind {
            body: Bytes::copy_from_slice(body),
            callback,
        },
    )
}

fn find_match(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    let request = decode::<FindMatchRequest>(input)?;
    submit(ctx, EngineRequest::FindMatch(request))
}

// ============================================================================
// Direct data
// ============================================================================

fn aps_data_request(ctx: &NcpContext, input: &[u8]) -> HandlerResult {
    expect_some(input)?;
    submit(ctx, EngineRequest::ApsData(Bytes::copy_from_slice(input)))
}

fn aps_poll(ctx: &NcpContext, kind: ApsKind, input: &[u8]) -> HandlerResult {
    expect_len(input, 0)?;
    match ctx.mailbox.poll(kind) {
        Some(payload) => Ok(payload),
        None => Ok(Bytes::copy_from_slice(&[ctx.store.state() as u8])),
    }
}

// ============================================================================
// Table
// ============================================================================

/// Builds the co-processor command table.
///
/// `NETWORK_JOINNETWORK` only ever travels as a notify and is deliberately
/// absent, so a request for it is answered as unsupported.
pub fn command_table() -> DispatchTable<NcpContext> {
    let builder = DispatchTable::builder()
        .register(Command::NetworkInit, network_init)
        .register(Command::NetworkStart, network_start)
        .register(Command::NetworkState, network_state)
        .register(Command::NetworkStackStatusHandler, stack_status)
        .register(Command::NetworkFormNetwork, form_network)
        .register(Command::NetworkPermitJoining, permit_joining)
        .register(Command::NetworkLeaveNetwork, leave_network)
        .register(Command::NetworkStartScan, start_scan)
        .register(Command::NetworkScanCompleteHandler, scan_complete)
        .register(Command::NetworkStopScan, stop_scan)
        .register(Command::NetworkPanIdGet, |ctx: &NcpContext, input: &[u8]| {
            get_param(ctx, input, |p| p.pan_id)
        })
        .register(Command::NetworkPanIdSet, |ctx: &NcpContext, input: &[u8]| {
            set_param(ctx, input, |p, v: u16| p.pan_id = v)
        })
        .register(
            Command::NetworkExtendedPanIdGet,
            |ctx: &NcpContext, input: &[u8]| get_param(ctx, input, |p| p.extended_pan_id),
        )
        .register(
            Command::NetworkExtendedPanIdSet,
            |ctx: &NcpContext, input: &[u8]| {
                set_param(ctx, input, |p, v: IeeeAddr| p.extended_pan_id = v)
            },
        )
        .register(
            Command::NetworkPrimaryChannelGet,
            |ctx: &NcpContext, input: &[u8]| get_param(ctx, input, |p| p.primary_channel_mask),
        )
        .register(
            Command::NetworkPrimaryChannelSet,
            |ctx: &NcpContext, input: &[u8]| {
                set_param(ctx, input, |p, v: u32| p.primary_channel_mask = v)
            },
        )
        .register(
            Command::NetworkSecondaryChannelGet,
            |ctx: &NcpContext, input: &[u8]| get_param(ctx, input, |p| p.secondary_channel_mask),
        )
        .register(
            Command::NetworkSecondaryChannelSet,
            |ctx: &NcpContext, input: &[u8]| {
                set_param(ctx, input, |p, v: u32| p.secondary_channel_mask = v)
            },
        )
        .register(Command::NetworkChannelGet, |ctx: &NcpContext, input: &[u8]| {
            get_param(ctx, input, |p| p.channel)
        })
        .register(Command::NetworkChannelSet, |ctx: &NcpContext, input: &[u8]| {
            set_param(ctx, input, |p, v: u32| p.primary_channel_mask = v)
        })
        .register(Command::NetworkTxPowerGet, |ctx: &NcpContext, input: &[u8]| {
            get_param(ctx, input, |p| p.tx_power)
        })
        .register(Command::NetworkTxPowerSet, |ctx: &NcpContext, input: &[u8]| {
            set_param(ctx, input, |p, v: i8| p.tx_power = v)
        })
        .register(
            Command::NetworkPrimaryKeyGet,
            |ctx: &NcpContext, input: &[u8]| get_param(ctx, input, |p| p.network_key),
        )
        .register(
            Command::NetworkPrimaryKeySet,
            |ctx: &NcpContext, input: &[u8]| {
                set_param(ctx, input, |p, v: [u8; 16]| p.network_key = v)
            },
        )
        .register(
            Command::NetworkFrameCountGet,
            |ctx: &NcpContext, input: &[u8]| get_param(ctx, input, |p| p.frame_counter),
        )
        .register(
            Command::NetworkFrameCountSet,
            |ctx: &NcpContext, input: &[u8]| set_param(ctx, input, |p, v: u32| p.frame_counter = v),
        )
        .register(Command::NetworkRoleGet, |ctx: &NcpContext, input: &[u8]| {
            get_param(ctx, input, |p| p.role as u8)
        })
        .register(Command::NetworkRoleSet, role_set)
        .register(
            Command::NetworkShortAddressGet,
            |ctx: &NcpContext, input: &[u8]| get_param(ctx, input, |p| p.short_addr),
        )
        .register(
            Command::NetworkShortAddressSet,
            |ctx: &NcpContext, input: &[u8]| set_param(ctx, input, |p, v: u16| p.short_addr = v),
        )
        .register(
            Command::NetworkLongAddressGet,
            |ctx: &NcpContext, input: &[u8]| get_param(ctx, input, |p| p.ieee_addr),
        )
        .register(
            Command::NetworkLongAddressSet,
            |ctx: &NcpContext, input: &[u8]| {
                set_param(ctx, input, |p, v: IeeeAddr| p.ieee_addr = v)
            },
        )
        .register(
            Command::NetworkChannelMasksGet,
            |ctx: &NcpContext, input: &[u8]| get_param(ctx, input, |p| p.primary_channel_mask),
        )
        .register(
            Command::NetworkChannelMasksSet,
            |ctx: &NcpContext, input: &[u8]| {
                set_param(ctx, input, |p, v: u32| p.primary_channel_mask = v)
            },
        )
        .register(Command::NetworkUpdateIdGet, |ctx: &NcpContext, input: &[u8]| {
            get_param(ctx, input, |p| p.update_id)
        })
        .register(Command::NetworkUpdateIdSet, |ctx: &NcpContext, input: &[u8]| {
            set_param(ctx, input, |p, v: u8| p.update_id = v)
        })
        .register(
            Command::NetworkTrustCenterAddrGet,
            |ctx: &NcpContext, input: &[u8]| get_param(ctx, input, |p| p.trust_center_addr),
        )
        .register(
            Command::NetworkTrustCenterAddrSet,
            |ctx: &NcpContext, input: &[u8]| {
                set_param(ctx, input, |p, v: IeeeAddr| p.trust_center_addr = v)
            },
        )
        .register(Command::NetworkLinkKeyGet, link_key_get)
        .register(Command::NetworkLinkKeySet, |ctx: &NcpContext, input: &[u8]| {
            set_param(ctx, input, |p, v: [u8; 16]| p.link_key = v)
        })
        .register(
            Command::NetworkSecureModeGet,
            |ctx: &NcpContext, input: &[u8]| get_param(ctx, input, |p| p.security_mode as u8),
        )
        .register(Command::NetworkSecureModeSet, secure_mode_set)
        .register(Command::NetworkPredefinedPanId, predefined_pan_id)
        .register(Command::NetworkShortToIeee, short_to_ieee)
        .register(Command::NetworkIeeeToShort, ieee_to_short)
        .register(Command::ZclEndpointAdd, endpoint_add)
        .register(Command::ZclEndpointDel, endpoint_del)
        .register(Command::ZdoBindSet, bind_set)
        .register(Command::ZdoUnbindSet, unbind_set)
        .register(Command::ZdoFindMatch, find_match)
        .register(Command::ApsDataRequest, aps_data_request)
        .register(
            Command::ApsDataIndication,
            |ctx: &NcpContext, input: &[u8]| aps_poll(ctx, ApsKind::Indication, input),
        )
        .register(Command::ApsDataConfirm, |ctx: &NcpContext, input: &[u8]| {
            aps_poll(ctx, ApsKind::Confirm, input)
        });

    Command::ALL
        .iter()
        .copied()
        .filter(|c| c.is_zcl_passthrough())
        .fold(builder, |builder, command| {
            builder.register(command, move |ctx: &NcpContext, input: &[u8]| {
                zcl_request(ctx, command, input)
            })
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineEvent, EventSink};
    use crate::sim::SimulatedEngine;
    use ncplink_protocol::message::{bind_request, DeviceAnnounce};
    use ncplink_protocol::{FrameKind, NetworkState, UserCallback, ERROR_RESPONSE_ID};
    use tokio::sync::mpsc;

    fn handler() -> (CommandHandler, mpsc::Receiver<EngineEvent>) {
        let store = Arc::new(NetworkStore::default());
        let (sink, rx) = EventSink::channel(64);
        let engine = Arc::new(SimulatedEngine::new(store.clone(), sink));
        (CommandHandler::new(NcpContext::new(store, engine)), rx)
    }

    fn call(handler: &CommandHandler, command: Command, input: &[u8]) -> HandlerResult {
        handler.dispatch(command.id(), input)
    }

    #[test]
    fn test_joinnetwork_not_registered() {
        let (handler, _rx) = handler();
        assert!(!handler.table().contains(Command::NetworkJoinNetwork.id()));
        assert_eq!(
            call(&handler, Command::NetworkJoinNetwork, &[]),
            Err(Status::Unsupported)
        );
        let expected = Command::ALL.len() - 1;
        assert_eq!(handler.table().len(), expected);
    }

    #[test]
    fn test_start_replies_success() {
        let (handler, mut rx) = handler();
        let out = call(&handler, Command::NetworkStart, &[0x01]).unwrap();
        assert_eq!(&out[..], &[0x00]);
        assert!(matches!(rx.try_recv(), Ok(EngineEvent::Formation(_))));
    }

    #[test]
    fn test_init_only_once() {
        let (handler, _rx) = handler();
        assert_eq!(&call(&handler, Command::NetworkInit, &[]).unwrap()[..], &[0]);
        assert_eq!(&call(&handler, Command::NetworkInit, &[]).unwrap()[..], &[1]);
        assert!(handler.context().is_initialized());
    }

    #[test]
    fn test_wrong_length_is_bad_argument() {
        let (handler, _rx) = handler();
        assert_eq!(
            call(&handler, Command::NetworkStart, &[]),
            Err(Status::BadArgument)
        );
        assert_eq!(
            call(&handler, Command::NetworkPanIdSet, &[1, 2, 3]),
            Err(Status::BadArgument)
        );
        assert_eq!(
            call(&handler, Command::NetworkPanIdGet, &[0]),
            Err(Status::BadArgument)
        );
    }

    #[test]
    fn test_pan_id_roundtrip() {
        let (handler, _rx) = handler();
        assert_eq!(
            &call(&handler, Command::NetworkPanIdSet, &[0x34, 0x12]).unwrap()[..],
            &[0]
        );
        assert_eq!(
            &call(&handler, Command::NetworkPanIdGet, &[]).unwrap()[..],
            &[0x34, 0x12]
        );
    }

    #[test]
    fn test_channel_get_reports_current_channel() {
        let (handler, _rx) = handler();
        call(&handler, Command::NetworkChannelSet, &[0, 0x08, 0, 0]).unwrap();
        assert_eq!(&call(&handler, Command::NetworkChannelGet, &[]).unwrap()[..], &[11]);
        assert_eq!(
            &call(&handler, Command::NetworkPrimaryChannelGet, &[]).unwrap()[..],
            &[0, 0x08, 0, 0]
        );
    }

    #[test]
    fn test_role_and_secure_mode_validation() {
        let (handler, _rx) = handler();
        assert_eq!(
            call(&handler, Command::NetworkRoleSet, &[9]),
            Err(Status::BadArgument)
        );
        call(&handler, Command::NetworkRoleSet, &[1]).unwrap();
        assert_eq!(&call(&handler, Command::NetworkRoleGet, &[]).unwrap()[..], &[1]);

        assert_eq!(
            call(&handler, Command::NetworkSecureModeSet, &[7]),
            Err(Status::BadArgument)
        );
        call(&handler, Command::NetworkSecureModeSet, &[1]).unwrap();
        assert_eq!(
            &call(&handler, Command::NetworkSecureModeGet, &[]).unwrap()[..],
            &[1]
        );
    }

    #[test]
    fn test_defaults_on_the_wire() {
        let (handler, _rx) = handler();
        assert_eq!(
            &call(&handler, Command::NetworkFrameCountGet, &[]).unwrap()[..],
            &0x1388u32.to_le_bytes()
        );
        assert_eq!(
            &call(&handler, Command::NetworkTrustCenterAddrGet, &[]).unwrap()[..],
            &[0xAB, 0x98, 0x09, 0xFF, 0xFF, 0x2E, 0x21, 0x00]
        );
        assert_eq!(
            &call(&handler, Command::NetworkUpdateIdGet, &[]).unwrap()[..],
            &[1]
        );

        let info =
            LinkKeyInfo::from_bytes(&call(&handler, Command::NetworkLinkKeyGet, &[]).unwrap())
                .unwrap();
        assert_eq!(&info.key, b"ZigBeeAlliance09");
    }

    #[test]
    fn test_predefined_pan_id_flag() {
        let (handler, _rx) = handler();
        let store = &handler.context().store;
        assert!(store.read(|p| p.use_predefined_pan_id));
        assert_eq!(
            &call(&handler, Command::NetworkPredefinedPanId, &[0]).unwrap()[..],
            &[0]
        );
        assert!(!store.read(|p| p.use_predefined_pan_id));
        assert_eq!(
            call(&handler, Command::NetworkPredefinedPanId, &[]).unwrap_err(),
            Status::BadArgument
        );
    }

    #[test]
    fn test_address_lookup_sentinels() {
        let (handler, _rx) = handler();
        assert_eq!(
            &call(&handler, Command::NetworkShortToIeee, &[0x99, 0x99]).unwrap()[..],
            &[0xFF; 8]
        );
        assert_eq!(
            &call(&handler, Command::NetworkIeeeToShort, &[0x11; 8]).unwrap()[..],
            &[0xFF, 0xFF]
        );

        handler.context().store.record_announce(&DeviceAnnounce {
            short_addr: 0x4321,
            ieee_addr: IeeeAddr([0x11; 8]),
            capability: 0,
        });
        assert_eq!(
            &call(&handler, Command::NetworkIeeeToShort, &[0x11; 8]).unwrap()[..],
            &[0x21, 0x43]
        );
    }

    #[test]
    fn test_endpoint_add_and_delete() {
        let (handler, _rx) = handler();
        let descriptor = EndpointDescriptor {
            endpoint: 10,
            profile_id: 0x0104,
            device_id: 0x0100,
            app_flags: 0,
            input_clusters: vec![0x0006],
            output_clusters: vec![],
        };
        call(&handler, Command::ZclEndpointAdd, &descriptor.to_bytes()).unwrap();
        assert_eq!(handler.context().store.endpoints(), vec![10]);

        assert_eq!(
            &call(&handler, Command::ZclEndpointDel, &[10]).unwrap()[..],
            &[0]
        );
        assert_eq!(
            call(&handler, Command::ZclEndpointDel, &[10]),
            Err(Status::BadArgument)
        );
    }

    #[test]
    fn test_bind_forwards_callback() {
        let (handler, mut rx) = handler();
        let callback = UserCallback::new(3, 99);
        let input = bind_request(&[0xAA, 0xBB], callback);
        call(&handler, Command::ZdoBindSet, &input).unwrap();

        match rx.try_recv().unwrap() {
            EngineEvent::BindComplete(done) => assert_eq!(done.callback, callback),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            call(&handler, Command::ZdoUnbindSet, &[0; 8]),
            Err(Status::BadArgument)
        );
    }

    #[test]
    fn test_zcl_passthrough_registered() {
        let (handler, mut rx) = handler();
        for command in Command::ALL.iter().filter(|c| c.is_zcl_passthrough()) {
            assert_eq!(&call(&handler, *command, &[1]).unwrap()[..], &[0]);
            assert_eq!(rx.try_recv().unwrap().command(), *command);
        }
        assert_eq!(
            call(&handler, Command::ZclAttrRead, &[]),
            Err(Status::BadArgument)
        );
    }

    #[test]
    fn test_aps_mailbox_switches_after_first_poll() {
        let (handler, _rx) = handler();
        let mailbox = &handler.context().mailbox;

        assert_eq!(
            mailbox.offer(ApsKind::Indication, Bytes::from_static(&[1, 2])),
            Delivery::Notify
        );

        let idle = call(&handler, Command::ApsDataIndication, &[]).unwrap();
        assert_eq!(&idle[..], &[NetworkState::Offline as u8]);

        assert_eq!(
            mailbox.offer(ApsKind::Indication, Bytes::from_static(&[1, 2])),
            Delivery::Queued
        );
        assert_eq!(
            &call(&handler, Command::ApsDataIndication, &[]).unwrap()[..],
            &[1, 2]
        );
        assert_eq!(
            mailbox.offer(ApsKind::Confirm, Bytes::from_static(&[0, 7])),
            Delivery::Notify
        );
    }

    #[test]
    fn test_aps_mailbox_bounded() {
        let mailbox = ApsMailbox::new(2);
        mailbox.poll(ApsKind::Confirm);
        assert_eq!(mailbox.offer(ApsKind::Confirm, Bytes::from_static(&[1, 0])), Delivery::Queued);
        assert_eq!(mailbox.offer(ApsKind::Confirm, Bytes::from_static(&[2, 0])), Delivery::Queued);
        assert_eq!(mailbox.offer(ApsKind::Confirm, Bytes::from_static(&[3, 0])), Delivery::Dropped);
        assert_eq!(mailbox.len(ApsKind::Confirm), 2);
        assert_eq!(&mailbox.poll(ApsKind::Confirm).unwrap()[..], &[1, 0]);

        mailbox.reset();
        assert_eq!(mailbox.len(ApsKind::Confirm), 0);
        assert_eq!(mailbox.offer(ApsKind::Confirm, Bytes::from_static(&[4, 0])), Delivery::Notify);
    }

    #[test]
    fn test_handle_builds_frames() {
        let (handler, _rx) = handler();
        let metrics = Arc::new(Metrics::new().unwrap());
        let handler = handler.with_metrics(metrics.clone());

        let response = handler.handle(&Frame::request(Command::NetworkStart, 7, vec![1]));
        assert_eq!(response.kind, FrameKind::Response);
        assert_eq!(response.id, Command::NetworkStart.id());
        assert_eq!(response.sn, 7);
        assert_eq!(&response.payload[..], &[0]);

        let response = handler.handle(&Frame::request(0x0042u16, 8, vec![]));
        assert_eq!(response.id, ERROR_RESPONSE_ID);
        assert_eq!(response.sn, 8);
        assert_eq!(response.error_status(), Some(Status::Unsupported));

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("command=\"UNKNOWN\""));
        assert!(encoded.contains("status=\"UNSUPPORTED\""));
    }
}
