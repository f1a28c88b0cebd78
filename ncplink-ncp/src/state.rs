//! Network parameter store.
//!
//! Holds everything the handlers read and mutate: the persistent network
//! parameters, the tracked network state, a neighbor table and the
//! registered endpoints. One lock guards the lot so that compound updates
//! (formation, announce) are observed atomically.

use ncplink_protocol::message::{
    DeviceAnnounce, EndpointDescriptor, ExtendedPanId, FormationInfo, UNKNOWN_SHORT_ADDR,
};
use ncplink_protocol::{DeviceRole, IeeeAddr, NetworkState, SecurityMode};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Default global trust-center link key.
pub const DEFAULT_LINK_KEY: [u8; 16] = *b"ZigBeeAlliance09";

/// Default network frame counter.
pub const DEFAULT_FRAME_COUNTER: u32 = 0x1388;

/// Every 2.4 GHz channel, 11 through 26.
pub const ALL_CHANNELS_MASK: u32 = 0x07FF_F800;

/// Persistent network parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    pub pan_id: u16,
    pub extended_pan_id: ExtendedPanId,
    pub channel: u8,
    pub primary_channel_mask: u32,
    pub secondary_channel_mask: u32,
    pub tx_power: i8,
    pub role: DeviceRole,
    pub short_addr: u16,
    pub ieee_addr: IeeeAddr,
    pub trust_center_addr: IeeeAddr,
    pub update_id: u8,
    pub frame_counter: u32,
    #[serde(with = "key_serde")]
    pub network_key: [u8; 16],
    #[serde(with = "key_serde")]
    pub link_key: [u8; 16],
    pub security_mode: SecurityMode,
    /// Form on `pan_id` as configured. When off the stack picks its own.
    pub use_predefined_pan_id: bool,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            pan_id: 0x1A62,
            extended_pan_id: IeeeAddr([0xDD; 8]),
            channel: 11,
            primary_channel_mask: ALL_CHANNELS_MASK,
            secondary_channel_mask: 0,
            tx_power: 10,
            role: DeviceRole::Coordinator,
            short_addr: 0x0000,
            ieee_addr: IeeeAddr([0x01, 0x00, 0x00, 0x00, 0x00, 0x4B, 0x12, 0x00]),
            trust_center_addr: IeeeAddr([0xAB, 0x98, 0x09, 0xFF, 0xFF, 0x2E, 0x21, 0x00]),
            update_id: 1,
            frame_counter: DEFAULT_FRAME_COUNTER,
            network_key: [
                0x01, 0x03, 0x05, 0x07, 0x09, 0x0B, 0x0D, 0x0F, 0x00, 0x02, 0x04, 0x06, 0x08,
                0x0A, 0x0C, 0x0D,
            ],
            link_key: DEFAULT_LINK_KEY,
            security_mode: SecurityMode::NoSecurity,
            use_predefined_pan_id: true,
        }
    }
}

struct Inner {
    params: NetworkParams,
    state: NetworkState,
    neighbors: HashMap<u16, IeeeAddr>,
    endpoints: BTreeMap<u8, EndpointDescriptor>,
}

/// Shared network parameter store.
pub struct NetworkStore {
    inner: RwLock<Inner>,
}

impl NetworkStore {
    pub fn new(params: NetworkParams) -> Self {
        Self {
            inner: RwLock::new(Inner {
                params,
                state: NetworkState::Offline,
                neighbors: HashMap::new(),
                endpoints: BTreeMap::new(),
            }),
        }
    }

    /// Returns a snapshot of the parameters.
    pub fn params(&self) -> NetworkParams {
        self.inner.read().params.clone()
    }

    /// Reads a value from the parameters.
    pub fn read<R>(&self, f: impl FnOnce(&NetworkParams) -> R) -> R {
        f(&self.inner.read().params)
    }

    /// Mutates the parameters in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut NetworkParams) -> R) -> R {
        f(&mut self.inner.write().params)
    }

    pub fn state(&self) -> NetworkState {
        self.inner.read().state
    }

    pub fn set_state(&self, state: NetworkState) {
        self.inner.write().state = state;
    }

    /// Records a formed network and marks the device connected.
    pub fn apply_formation(&self, info: &FormationInfo) {
        let mut inner = self.inner.write();
        inner.params.pan_id = info.pan_id;
        inner.params.extended_pan_id = info.extended_pan_id;
        inner.params.channel = info.channel;
        inner.state = NetworkState::Connected;
    }

    /// Adds or refreshes a neighbor from its announcement.
    pub fn record_announce(&self, announce: &DeviceAnnounce) {
        self.inner
            .write()
            .neighbors
            .insert(announce.short_addr, announce.ieee_addr);
    }

    pub fn remove_neighbor(&self, short_addr: u16) -> Option<IeeeAddr> {
        self.inner.write().neighbors.remove(&short_addr)
    }

    pub fn neighbor_count(&self) -> usize {
        self.inner.read().neighbors.len()
    }

    /// Resolves a short address, including this device's own.
    pub fn ieee_of(&self, short_addr: u16) -> Option<IeeeAddr> {
        let inner = self.inner.read();
        if short_addr == inner.params.short_addr {
            return Some(inner.params.ieee_addr);
        }
        inner.neighbors.get(&short_addr).copied()
    }

    /// Resolves an IEEE address, including this device's own.
    pub fn short_of(&self, ieee_addr: &IeeeAddr) -> Option<u16> {
        let inner = self.inner.read();
        if *ieee_addr == inner.params.ieee_addr {
            return Some(inner.params.short_addr);
        }
        inner
            .neighbors
            .iter()
            .find(|(_, ieee)| *ieee == ieee_addr)
            .map(|(short, _)| *short)
            .filter(|short| *short != UNKNOWN_SHORT_ADDR)
    }

    /// Registers an endpoint, replacing any earlier registration of the
    /// same number. Returns whether one was replaced.
    pub fn add_endpoint(&self, descriptor: EndpointDescriptor) -> bool {
        self.inner
            .write()
            .endpoints
            .insert(descriptor.endpoint, descriptor)
            .is_some()
    }

    pub fn remove_endpoint(&self, endpoint: u8) -> Option<EndpointDescriptor> {
        self.inner.write().endpoints.remove(&endpoint)
    }

    /// Registered endpoint numbers in ascending order.
    pub fn endpoints(&self) -> Vec<u8> {
        self.inner.read().endpoints.keys().copied().collect()
    }
}

impl Default for NetworkStore {
    fn default() -> Self {
        Self::new(NetworkParams::default())
    }
}

/// Keys are stored in YAML as hex strings.
mod key_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(key: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 16], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.trim()).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::invalid_length(v.len(), &"16 bytes"))
    }
}
