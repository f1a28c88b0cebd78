//! In-process stand-in for a real network stack.

use crate::engine::{EngineEvent, EngineRequest, EventSink, ProtocolEngine};
use crate::state::{NetworkParams, NetworkStore};
use bytes::{BufMut, Bytes, BytesMut};
use ncplink_protocol::message::{
    BindComplete, DeviceAnnounce, FindMatchComplete, FormationInfo, LeaveIndication,
    NetworkDescriptor, ScanComplete,
};
use ncplink_protocol::{NetworkState, Status};
use std::sync::Arc;
use tracing::debug;

/// Permit-join window opened after an automatic start.
pub const AUTOSTART_PERMIT_SECS: u8 = 180;

/// Upper bound for a PAN ID the stack picks on its own.
const MAX_CHOSEN_PAN_ID: u16 = 0x3FFF;

/// Endpoint reported by simulated match descriptor answers.
const MATCH_ENDPOINT: u8 = 1;

/// Accepts every request and emits the event a real stack would produce.
pub struct SimulatedEngine {
    store: Arc<NetworkStore>,
    events: EventSink,
}

impl SimulatedEngine {
    pub fn new(store: Arc<NetworkStore>, events: EventSink) -> Self {
        Self { store, events }
    }

    /// Simulates a device joining the network.
    pub fn announce(&self, announce: DeviceAnnounce) -> bool {
        self.events.emit(EngineEvent::DeviceAnnounce(announce))
    }

    /// Simulates an inbound APS data frame.
    pub fn indicate(&self, payload: impl Into<Bytes>) -> bool {
        self.events.emit(EngineEvent::ApsIndication(payload.into()))
    }

    fn formation(&self) -> FormationInfo {
        self.store.read(|p| FormationInfo {
            extended_pan_id: p.extended_pan_id,
            pan_id: if p.use_predefined_pan_id {
                p.pan_id
            } else {
                chosen_pan_id(p)
            },
            channel: p.channel,
        })
    }
}

/// PAN ID the stack picks for itself, derived from the device address and
/// never equal to the configured one.
fn chosen_pan_id(params: &NetworkParams) -> u16 {
    let folded = params
        .ieee_addr
        .0
        .chunks_exact(2)
        .fold(0u16, |acc, pair| acc ^ u16::from_le_bytes([pair[0], pair[1]]));
    let pan_id = (folded ^ params.update_id as u16) & MAX_CHOSEN_PAN_ID;
    if pan_id == params.pan_id {
        (pan_id + 1) & MAX_CHOSEN_PAN_ID
    } else {
        pan_id
    }
}

impl ProtocolEngine for SimulatedEngine {
    fn submit(&self, request: EngineRequest) -> Status {
        debug!(request = request.name(), "Simulated engine request");

        match request {
            EngineRequest::PlatformInit | EngineRequest::StopScan => {}
            EngineRequest::Start { autostart } => {
                if autostart {
                    self.events.emit(EngineEvent::Formation(self.formation()));
                    self.events.emit(EngineEvent::PermitJoin {
                        seconds: AUTOSTART_PERMIT_SECS,
                    });
                }
            }
            EngineRequest::FormNetwork(_) => {
                self.events.emit(EngineEvent::Formation(self.formation()));
            }
            EngineRequest::PermitJoin { seconds } => {
                self.events.emit(EngineEvent::PermitJoin { seconds });
            }
            EngineRequest::Leave => {
                let leave = self.store.read(|p| LeaveIndication {
                    short_addr: p.short_addr,
                    ieee_addr: p.ieee_addr,
                    rejoin: false,
                });
                self.events.emit(EngineEvent::Leave(leave));
            }
            EngineRequest::StartScan(_) => {
                let networks = if self.store.state() == NetworkState::Connected {
                    let info = self.formation();
                    vec![NetworkDescriptor {
                        pan_id: info.pan_id,
                        permit_joining: true,
                        extended_pan_id: info.extended_pan_id,
                        logical_channel: info.channel,
                    }]
                } else {
                    Vec::new()
                };
                self.events.emit(EngineEvent::ScanComplete(ScanComplete {
                    status: Status::Success.as_u8(),
                    networks,
                }));
            }
            EngineRequest::Zcl { command, .. } => {
                self.events.emit(EngineEvent::Zcl {
                    command,
                    payload: Bytes::from_static(&[0x00]),
                });
            }
            EngineRequest::Bind { callback, .. } => {
                self.events.emit(EngineEvent::BindComplete(BindComplete {
                    status: Status::Success.as_u8(),
                    callback,
                }));
            }
            EngineRequest::Unbind { callback, .. } => {
                self.events.emit(EngineEvent::UnbindComplete(BindComplete {
                    status: Status::Success.as_u8(),
                    callback,
                }));
            }
            EngineRequest::FindMatch(request) => {
                self.events
                    .emit(EngineEvent::FindMatchComplete(FindMatchComplete {
                        status: Status::Success.as_u8(),
                        short_addr: request.addr_of_interest,
                        endpoint: MATCH_ENDPOINT,
                        callback: request.callback,
                    }));
            }
            EngineRequest::ApsData(payload) => {
                // Confirm record: status byte, then the request echoed back.
                let mut confirm = BytesMut::with_capacity(payload.len() + 1);
                confirm.put_u8(Status::Success.as_u8());
                confirm.put_slice(&payload);
                self.events.emit(EngineEvent::ApsConfirm(confirm.freeze()));
            }
        }

        Status::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncplink_protocol::{Command, IeeeAddr, UserCallback};
    use tokio::sync::mpsc;

    fn engine() -> (SimulatedEngine, mpsc::Receiver<EngineEvent>) {
        let (sink, rx) = EventSink::channel(16);
        (
            SimulatedEngine::new(Arc::new(NetworkStore::default()), sink),
            rx,
        )
    }

    #[tokio::test]
    async fn test_start_forms_and_permits() {
        let (engine, mut rx) = engine();
        assert_eq!(
            engine.submit(EngineRequest::Start { autostart: true }),
            Status::Success
        );

        match rx.recv().await.unwrap() {
            EngineEvent::Formation(info) => assert_eq!(info.pan_id, 0x1A62),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::PermitJoin { seconds: 180 }
        );
    }

    #[tokio::test]
    async fn test_formation_honors_predefined_pan_id() {
        let store = Arc::new(NetworkStore::default());
        let (sink, mut rx) = EventSink::channel(16);
        let engine = SimulatedEngine::new(store.clone(), sink);

        engine.submit(EngineRequest::FormNetwork(Default::default()));
        let predefined = match rx.recv().await.unwrap() {
            EngineEvent::Formation(info) => info.pan_id,
            other => panic!("unexpected event: {:?}", other),
        };
        assert_eq!(predefined, 0x1A62);

        store.update(|p| p.use_predefined_pan_id = false);
        engine.submit(EngineRequest::FormNetwork(Default::default()));
        let chosen = match rx.recv().await.unwrap() {
            EngineEvent::Formation(info) => info.pan_id,
            other => panic!("unexpected event: {:?}", other),
        };
        assert_ne!(chosen, predefined);
        assert!(chosen <= MAX_CHOSEN_PAN_ID);
    }

    #[tokio::test]
    async fn test_bind_echoes_callback() {
        let (engine, mut rx) = engine();
        let callback = UserCallback::new(7, 0xCAFE);
        engine.submit(EngineRequest::Bind {
            body: Bytes::from_static(&[1, 2, 3]),
            callback,
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::BindComplete(BindComplete {
                status: 0,
                callback
            })
        );
    }

    #[tokio::test]
    async fn test_zcl_status_notify() {
        let (engine, mut rx) = engine();
        engine.submit(EngineRequest::Zcl {
            command: Command::ZclAttrWrite,
            payload: Bytes::from_static(&[9, 9]),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.command(), Command::ZclAttrWrite);
        assert_eq!(&event.payload()[..], &[0]);
    }

    #[tokio::test]
    async fn test_scan_lists_formed_network_only() {
        let (engine, mut rx) = engine();
        engine.submit(EngineRequest::StartScan(
            ncplink_protocol::message::ScanRequest {
                channel_mask: 0x0800,
                scan_duration: 3,
            },
        ));
        match rx.recv().await.unwrap() {
            EngineEvent::ScanComplete(scan) => assert!(scan.networks.is_empty()),
            other => panic!("unexpected event: {:?}", other),
        }

        engine.store.set_state(NetworkState::Connected);
        engine.submit(EngineRequest::StartScan(
            ncplink_protocol::message::ScanRequest {
                channel_mask: 0x0800,
                scan_duration: 3,
            },
        ));
        match rx.recv().await.unwrap() {
            EngineEvent::ScanComplete(scan) => {
                assert_eq!(scan.networks.len(), 1);
                assert_eq!(scan.networks[0].logical_channel, 11);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_aps_confirm_echoes_payload() {
        let (engine, mut rx) = engine();
        engine.submit(EngineRequest::ApsData(Bytes::from_static(&[0x42])));
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::ApsConfirm(Bytes::from_static(&[0x00, 0x42]))
        );

        engine.announce(DeviceAnnounce {
            short_addr: 0x2222,
            ieee_addr: IeeeAddr::from_u64(5),
            capability: 0,
        });
        assert_eq!(rx.recv().await.unwrap().command(), Command::NetworkJoinNetwork);
    }
}
