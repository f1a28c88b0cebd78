//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::HostError;
use crate::notify::HostEvent;
use bytes::Bytes;
use ncplink_protocol::message::{
    bind_request, parse_status, ApsPoll, EndpointDescriptor, FindMatchRequest, FormNetworkParams,
    LinkKeyInfo, ScanRequest, UNKNOWN_SHORT_ADDR,
};
use ncplink_protocol::{
    Command, DeviceRole, IeeeAddr, NetworkState, SecurityMode, Status, UserCallback, WireFormat,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// High-level client for a co-processor.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Result<Self, HostError> {
        Ok(Self {
            conn: Arc::new(Connection::new(config)?),
        })
    }

    pub fn from_connection(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// Opens the configured endpoint.
    pub async fn connect(&self) -> Result<(), HostError> {
        self.conn.connect().await
    }

    /// Runs the connection's read loop on a background task.
    pub fn spawn_read_loop(&self) -> JoinHandle<Result<(), HostError>> {
        let conn = self.conn.clone();
        tokio::spawn(async move { conn.read_loop().await })
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), HostError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Raw call: any identifier, any payload.
    pub async fn call(&self, command: u16, input: &[u8]) -> Result<Bytes, HostError> {
        self.conn.call(command, input).await
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    /// Calls a command answered by a single status byte.
    async fn expect_status(&self, command: Command, input: &[u8]) -> Result<(), HostError> {
        let payload = self.conn.call(command, input).await?;
        let status = parse_status(&payload).map_err(|_| HostError::UnexpectedPayload {
            command: command.id(),
            len: payload.len(),
        })?;
        if status != Status::Success {
            return Err(HostError::Rejected {
                command: command.id(),
                status,
            });
        }
        Ok(())
    }

    async fn get<T: WireFormat>(&self, command: Command) -> Result<T, HostError> {
        let payload = self.conn.call(command, &[]).await?;
        T::from_bytes(&payload).map_err(|_| HostError::UnexpectedPayload {
            command: command.id(),
            len: payload.len(),
        })
    }

    async fn set<T: WireFormat>(&self, command: Command, value: T) -> Result<(), HostError> {
        self.expect_status(command, &value.to_bytes()).await
    }

    async fn get_enum<E: TryFrom<u8>>(&self, command: Command) -> Result<E, HostError> {
        let raw: u8 = self.get(command).await?;
        E::try_from(raw).map_err(|_| HostError::UnexpectedPayload {
            command: command.id(),
            len: 1,
        })
    }

    // =========================================================================
    // Network lifecycle
    // =========================================================================

    pub async fn init(&self) -> Result<(), HostError> {
        self.expect_status(Command::NetworkInit, &[]).await
    }

    /// Starts the stack. With `autostart` the co-processor forms a network
    /// and opens it for joining.
    pub async fn start(&self, autostart: bool) -> Result<(), HostError> {
        self.set(Command::NetworkStart, autostart).await
    }

    pub async fn state(&self) -> Result<NetworkState, HostError> {
        self.get_enum(Command::NetworkState).await
    }

    pub async fn stack_status(&self, report: &[u8]) -> Result<(), HostError> {
        self.expect_status(Command::NetworkStackStatusHandler, report)
            .await
    }

    /// Requests formation. Completion arrives as [`HostEvent::NetworkFormed`].
    pub async fn form_network(&self, params: &FormNetworkParams) -> Result<(), HostError> {
        self.expect_status(Command::NetworkFormNetwork, &params.to_bytes())
            .await
    }

    pub async fn permit_joining(&self, seconds: u8) -> Result<(), HostError> {
        self.set(Command::NetworkPermitJoining, seconds).await
    }

    pub async fn leave(&self) -> Result<(), HostError> {
        self.expect_status(Command::NetworkLeaveNetwork, &[]).await
    }

    /// Starts an active scan. Results arrive as [`HostEvent::ScanComplete`].
    pub async fn start_scan(&self, request: &ScanRequest) -> Result<(), HostError> {
        self.expect_status(Command::NetworkStartScan, &request.to_bytes())
            .await
    }

    pub async fn stop_scan(&self) -> Result<(), HostError> {
        self.expect_status(Command::NetworkStopScan, &[]).await
    }

    // =========================================================================
    // Network parameters
    // =========================================================================

    pub async fn pan_id(&self) -> Result<u16, HostError> {
        self.get(Command::NetworkPanIdGet).await
    }

    pub async fn set_pan_id(&self, pan_id: u16) -> Result<(), HostError> {
        self.set(Command::NetworkPanIdSet, pan_id).await
    }

    /// Keeps the configured PAN ID on formation instead of picking one.
    pub async fn set_predefined_pan_id(&self, enabled: bool) -> Result<(), HostError> {
        self.set(Command::NetworkPredefinedPanId, enabled).await
    }

    pub async fn extended_pan_id(&self) -> Result<IeeeAddr, HostError> {
        self.get(Command::NetworkExtendedPanIdGet).await
    }

    pub async fn set_extended_pan_id(&self, extended_pan_id: IeeeAddr) -> Result<(), HostError> {
        self.set(Command::NetworkExtendedPanIdSet, extended_pan_id)
            .await
    }

    pub async fn primary_channel_mask(&self) -> Result<u32, HostError> {
        self.get(Command::NetworkPrimaryChannelGet).await
    }

    pub async fn set_primary_channel_mask(&self, mask: u32) -> Result<(), HostError> {
        self.set(Command::NetworkPrimaryChannelSet, mask).await
    }

    pub async fn secondary_channel_mask(&self) -> Result<u32, HostError> {
        self.get(Command::NetworkSecondaryChannelGet).await
    }

    pub async fn set_secondary_channel_mask(&self, mask: u32) -> Result<(), HostError> {
        self.set(Command::NetworkSecondaryChannelSet, mask).await
    }

    /// Current logical channel.
    pub async fn channel(&self) -> Result<u8, HostError> {
        self.get(Command::NetworkChannelGet).await
    }

    /// Restricts formation to the channels in `mask`.
    pub async fn set_channel(&self, mask: u32) -> Result<(), HostError> {
        self.set(Command::NetworkChannelSet, mask).await
    }

    pub async fn channel_masks(&self) -> Result<u32, HostError> {
        self.get(Command::NetworkChannelMasksGet).await
    }

    pub async fn set_channel_masks(&self, mask: u32) -> Result<(), HostError> {
        self.set(Command::NetworkChannelMasksSet, mask).await
    }

    pub async fn tx_power(&self) -> Result<i8, HostError> {
        self.get(Command::NetworkTxPowerGet).await
    }

    pub async fn set_tx_power(&self, dbm: i8) -> Result<(), HostError> {
        self.set(Command::NetworkTxPowerSet, dbm).await
    }

    pub async fn network_key(&self) -> Result<[u8; 16], HostError> {
        self.get(Command::NetworkPrimaryKeyGet).await
    }

    pub async fn set_network_key(&self, key: [u8; 16]) -> Result<(), HostError> {
        self.set(Command::NetworkPrimaryKeySet, key).await
    }

    pub async fn frame_counter(&self) -> Result<u32, HostError> {
        self.get(Command::NetworkFrameCountGet).await
    }

    pub async fn set_frame_counter(&self, counter: u32) -> Result<(), HostError> {
        self.set(Command::NetworkFrameCountSet, counter).await
    }

    pub async fn role(&self) -> Result<DeviceRole, HostError> {
        self.get_enum(Command::NetworkRoleGet).await
    }

    pub async fn set_role(&self, role: DeviceRole) -> Result<(), HostError> {
        self.set(Command::NetworkRoleSet, role as u8).await
    }

    pub async fn short_address(&self) -> Result<u16, HostError> {
        self.get(Command::NetworkShortAddressGet).await
    }

    pub async fn set_short_address(&self, short_addr: u16) -> Result<(), HostError> {
        self.set(Command::NetworkShortAddressSet, short_addr).await
    }

    pub async fn ieee_address(&self) -> Result<IeeeAddr, HostError> {
        self.get(Command::NetworkLongAddressGet).await
    }

    pub async fn set_ieee_address(&self, ieee_addr: IeeeAddr) -> Result<(), HostError> {
        self.set(Command::NetworkLongAddressSet, ieee_addr).await
    }

    pub async fn update_id(&self) -> Result<u8, HostError> {
        self.get(Command::NetworkUpdateIdGet).await
    }

    pub async fn set_update_id(&self, update_id: u8) -> Result<(), HostError> {
        self.set(Command::NetworkUpdateIdSet, update_id).await
    }

    pub async fn trust_center_address(&self) -> Result<IeeeAddr, HostError> {
        self.get(Command::NetworkTrustCenterAddrGet).await
    }

    pub async fn set_trust_center_address(&self, ieee_addr: IeeeAddr) -> Result<(), HostError> {
        self.set(Command::NetworkTrustCenterAddrSet, ieee_addr).await
    }

    pub async fn link_key(&self) -> Result<LinkKeyInfo, HostError> {
        self.get(Command::NetworkLinkKeyGet).await
    }

    pub async fn set_link_key(&self, key: [u8; 16]) -> Result<(), HostError> {
        self.set(Command::NetworkLinkKeySet, key).await
    }

    pub async fn security_mode(&self) -> Result<SecurityMode, HostError> {
        self.get_enum(Command::NetworkSecureModeGet).await
    }

    pub async fn set_security_mode(&self, mode: SecurityMode) -> Result<(), HostError> {
        self.set(Command::NetworkSecureModeSet, mode as u8).await
    }

    // =========================================================================
    // Address lookup
    // =========================================================================

    /// Resolves a short address. `None` when the device is unknown.
    pub async fn short_to_ieee(&self, short_addr: u16) -> Result<Option<IeeeAddr>, HostError> {
        let payload = self
            .conn
            .call(Command::NetworkShortToIeee, &short_addr.to_bytes())
            .await?;
        let ieee = IeeeAddr::from_bytes(&payload).map_err(|_| HostError::UnexpectedPayload {
            command: Command::NetworkShortToIeee.id(),
            len: payload.len(),
        })?;
        Ok((!ieee.is_unknown()).then_some(ieee))
    }

    /// Resolves an IEEE address. `None` when the device is unknown.
    pub async fn ieee_to_short(&self, ieee_addr: &IeeeAddr) -> Result<Option<u16>, HostError> {
        let payload = self
            .conn
            .call(Command::NetworkIeeeToShort, &ieee_addr.to_bytes())
            .await?;
        let short_addr = u16::from_bytes(&payload).map_err(|_| HostError::UnexpectedPayload {
            command: Command::NetworkIeeeToShort.id(),
            len: payload.len(),
        })?;
        Ok((short_addr != UNKNOWN_SHORT_ADDR).then_some(short_addr))
    }

    // =========================================================================
    // Cluster library
    // =========================================================================

    pub async fn endpoint_add(&self, descriptor: &EndpointDescriptor) -> Result<(), HostError> {
        descriptor.validate()?;
        self.expect_status(Command::ZclEndpointAdd, &descriptor.to_bytes())
            .await
    }

    pub async fn endpoint_del(&self, endpoint: u8) -> Result<(), HostError> {
        self.set(Command::ZclEndpointDel, endpoint).await
    }

    /// Sends an opaque cluster-library request. The result arrives as
    /// [`HostEvent::Zcl`] with the same command.
    pub async fn zcl(&self, command: Command, payload: &[u8]) -> Result<(), HostError> {
        if !command.is_zcl_passthrough() {
            return Err(HostError::Rejected {
                command: command.id(),
                status: Status::BadArgument,
            });
        }
        self.expect_status(command, payload).await
    }

    // =========================================================================
    // Binding and discovery
    // =========================================================================

    /// Requests a binding. `on_complete` runs once with the completion.
    pub async fn bind<F>(&self, body: &[u8], context: u32, on_complete: F) -> Result<UserCallback, HostError>
    where
        F: FnOnce(&HostEvent) + Send + 'static,
    {
        self.with_callback(Command::ZdoBindSet, context, on_complete, |record| {
            bind_request(body, record)
        })
        .await
    }

    /// Removes a binding. `on_complete` runs once with the completion.
    pub async fn unbind<F>(&self, body: &[u8], context: u32, on_complete: F) -> Result<UserCallback, HostError>
    where
        F: FnOnce(&HostEvent) + Send + 'static,
    {
        self.with_callback(Command::ZdoUnbindSet, context, on_complete, |record| {
            bind_request(body, record)
        })
        .await
    }

    /// Starts match-descriptor discovery. The callback record in `request`
    /// is replaced by one naming `on_complete`.
    pub async fn find_match<F>(
        &self,
        mut request: FindMatchRequest,
        context: u32,
        on_complete: F,
    ) -> Result<UserCallback, HostError>
    where
        F: FnOnce(&HostEvent) + Send + 'static,
    {
        request.validate()?;
        self.with_callback(Command::ZdoFindMatch, context, on_complete, |record| {
            request.callback = record;
            request.to_bytes()
        })
        .await
    }

    async fn with_callback<F>(
        &self,
        command: Command,
        context: u32,
        on_complete: F,
        build: impl FnOnce(UserCallback) -> Bytes,
    ) -> Result<UserCallback, HostError>
    where
        F: FnOnce(&HostEvent) + Send + 'static,
    {
        let callbacks = self.conn.callbacks();
        let record = callbacks.register(context, on_complete);
        let payload = build(record);
        match self.expect_status(command, &payload).await {
            Ok(()) => Ok(record),
            Err(e) => {
                callbacks.cancel(&record);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Direct data
    // =========================================================================

    pub async fn aps_data_request(&self, payload: &[u8]) -> Result<(), HostError> {
        self.expect_status(Command::ApsDataRequest, payload).await
    }

    /// Takes the oldest queued indication. After the first poll,
    /// indications are no longer delivered as events.
    pub async fn poll_indication(&self) -> Result<ApsPoll, HostError> {
        self.poll(Command::ApsDataIndication).await
    }

    /// Takes the oldest queued confirm. After the first poll, confirms are
    /// no longer delivered as events.
    pub async fn poll_confirm(&self) -> Result<ApsPoll, HostError> {
        self.poll(Command::ApsDataConfirm).await
    }

    async fn poll(&self, command: Command) -> Result<ApsPoll, HostError> {
        let payload = self.conn.call(command, &[]).await?;
        let len = payload.len();
        ApsPoll::parse(payload).map_err(|_| HostError::UnexpectedPayload {
            command: command.id(),
            len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncplink_bus::LinkStream;
    use ncplink_ncp::{Config, Ncp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn attached() -> (Client, Arc<Ncp>) {
        let ncp = Arc::new(Ncp::new(&Config::default(), None).unwrap());
        let (host, link) = LinkStream::pair(4096);
        let server = ncp.clone();
        tokio::spawn(async move { server.serve(link).await });

        let client = Client::new(
            ConnectionConfig::new().with_request_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        client.connection().attach(host).await.unwrap();
        client.spawn_read_loop();
        (client, ncp)
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (client, _ncp) = attached().await;

        client.init().await.unwrap();
        let err = client.init().await.unwrap_err();
        assert_eq!(err.status(), Some(Status::Fatal));

        assert_eq!(client.state().await.unwrap(), NetworkState::Offline);
        let mut events = client.connection().subscribe();
        client.start(true).await.unwrap();
        let formed = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(formed, HostEvent::NetworkFormed(_)));
        assert!(client.connection().network().is_some());
        assert_eq!(client.state().await.unwrap(), NetworkState::Connected);
    }

    #[tokio::test]
    async fn test_formation_without_predefined_pan_id() {
        let (client, _ncp) = attached().await;
        let configured = client.pan_id().await.unwrap();

        client.set_predefined_pan_id(false).await.unwrap();
        let mut events = client.connection().subscribe();
        client
            .form_network(&FormNetworkParams::default())
            .await
            .unwrap();
        let formed = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        let HostEvent::NetworkFormed(info) = formed else {
            panic!("unexpected event: {:?}", formed);
        };

        assert_ne!(info.pan_id, configured);
        assert_eq!(client.pan_id().await.unwrap(), info.pan_id);
    }

    #[tokio::test]
    async fn test_oversized_cluster_lists_fail_locally() {
        let (client, _ncp) = attached().await;

        let descriptor = EndpointDescriptor {
            endpoint: 2,
            profile_id: 0x0104,
            device_id: 0x0005,
            app_flags: 0,
            input_clusters: vec![0x0006; 256],
            output_clusters: vec![],
        };
        assert!(matches!(
            client.endpoint_add(&descriptor).await,
            Err(HostError::Protocol(_))
        ));

        let request = FindMatchRequest {
            callback: UserCallback::default(),
            dst_nwk_addr: 0x0000,
            addr_of_interest: 0x0000,
            profile_id: 0x0104,
            input_clusters: vec![],
            output_clusters: vec![0x0008; 256],
        };
        assert!(matches!(
            client.find_match(request, 1, |_| {}).await,
            Err(HostError::Protocol(_))
        ));
        assert!(client.connection().callbacks().is_empty());
        assert_eq!(client.connection().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_parameters() {
        let (client, _ncp) = attached().await;

        client.set_pan_id(0x1234).await.unwrap();
        assert_eq!(client.pan_id().await.unwrap(), 0x1234);

        client.set_tx_power(-4).await.unwrap();
        assert_eq!(client.tx_power().await.unwrap(), -4);

        client.set_role(DeviceRole::Router).await.unwrap();
        assert_eq!(client.role().await.unwrap(), DeviceRole::Router);

        let key = [0xA5; 16];
        client.set_network_key(key).await.unwrap();
        assert_eq!(client.network_key().await.unwrap(), key);

        let ieee = IeeeAddr::from_u64(0x0021_2EFF_FF09_98AB);
        client.set_ieee_address(ieee).await.unwrap();
        assert_eq!(client.ieee_address().await.unwrap(), ieee);
        assert_eq!(client.link_key().await.unwrap().ieee_addr, ieee);
    }

    #[tokio::test]
    async fn test_lookup_unknown_addresses() {
        let (client, _ncp) = attached().await;

        assert_eq!(client.short_to_ieee(0x4242).await.unwrap(), None);
        assert_eq!(
            client
                .ieee_to_short(&IeeeAddr::from_u64(1))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_rejections() {
        let (client, _ncp) = attached().await;

        let err = client.endpoint_del(7).await.unwrap_err();
        assert_eq!(err.status(), Some(Status::BadArgument));

        let err = client.zcl(Command::NetworkInit, &[0x01]).await.unwrap_err();
        assert!(matches!(err, HostError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_bind_invokes_callback_once() {
        let (client, _ncp) = attached().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel();

        let counter = hits.clone();
        let record = client
            .bind(&[0x01, 0x02, 0x03], 0xBEEF, move |event| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(matches!(event, HostEvent::BindComplete(_)));
            })
            .await
            .unwrap();
        assert!(record.is_set());
        assert_eq!(record.context, 0xBEEF);

        let was_bind = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(was_bind);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(client.connection().callbacks().is_empty());
    }

    #[tokio::test]
    async fn test_poll_switches_to_mailbox() {
        let (client, _ncp) = attached().await;

        match client.poll_confirm().await.unwrap() {
            ApsPoll::Idle(state) => assert_eq!(state, NetworkState::Offline),
            other => panic!("unexpected poll result: {:?}", other),
        }

        client.aps_data_request(&[0x10, 0x20]).await.unwrap();
        let confirm = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let ApsPoll::Data(payload) = client.poll_confirm().await.unwrap() {
                    return payload;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(&confirm[..], &[0x00, 0x10, 0x20]);
    }
}
