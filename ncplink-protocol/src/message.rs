//! Typed payloads carried inside frames.
//!
//! Payloads are packed little-endian records with no padding. Each type
//! implements [`WireFormat`]; decoding checks lengths up front and never
//! reads past the end of the input.

use crate::error::ProtocolError;
use crate::status::{DeviceRole, NetworkState, Status};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Binary encoding of a payload record.
pub trait WireFormat: Sized {
    /// Appends the encoded record to `buf`.
    fn write_to(&self, buf: &mut BytesMut);

    /// Reads one record from the front of `buf`, advancing it.
    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError>;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Decodes a record that must span all of `data`.
    fn from_bytes(mut data: &[u8]) -> Result<Self, ProtocolError> {
        let value = Self::read_from(&mut data)?;
        if !data.is_empty() {
            return Err(ProtocolError::InvalidValue {
                field: "trailing bytes",
                value: data.len() as u32,
            });
        }
        Ok(value)
    }
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

fn read_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], ProtocolError> {
    ensure(buf, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Cluster lists are prefixed by one-byte counts.
fn check_cluster_counts(inputs: &[u16], outputs: &[u16]) -> Result<(), ProtocolError> {
    for (field, list) in [
        ("input cluster count", inputs),
        ("output cluster count", outputs),
    ] {
        if list.len() > u8::MAX as usize {
            return Err(ProtocolError::InvalidValue {
                field,
                value: list.len() as u32,
            });
        }
    }
    Ok(())
}

fn read_u16_list(buf: &mut &[u8], count: usize) -> Result<Vec<u16>, ProtocolError> {
    ensure(buf, count * 2)?;
    Ok((0..count).map(|_| buf.get_u16_le()).collect())
}

impl WireFormat for u8 {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 1)?;
        Ok(buf.get_u8())
    }
}

impl WireFormat for i8 {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_i8(*self);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 1)?;
        Ok(buf.get_i8())
    }
}

impl WireFormat for bool {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(*self as u8);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 1)?;
        Ok(buf.get_u8() != 0)
    }
}

impl WireFormat for u16 {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16_le(*self);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 2)?;
        Ok(buf.get_u16_le())
    }
}

impl WireFormat for u32 {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(*self);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 4)?;
        Ok(buf.get_u32_le())
    }
}

impl<const N: usize> WireFormat for [u8; N] {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(self);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        read_array(buf)
    }
}

// ============================================================================
// Addresses
// ============================================================================

/// 64-bit IEEE (EUI-64) address, stored in wire (little-endian) order.
///
/// Displayed most-significant byte first, e.g. `00:21:2e:ff:ff:09:98:ab`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct IeeeAddr(pub [u8; 8]);

/// Extended PAN identifiers share the IEEE address representation.
pub type ExtendedPanId = IeeeAddr;

impl IeeeAddr {
    pub const UNKNOWN: IeeeAddr = IeeeAddr([0xFF; 8]);

    pub fn from_u64(value: u64) -> Self {
        Self(value.to_le_bytes())
    }

    pub fn as_u64(&self) -> u64 {
        u64::from_le_bytes(self.0)
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl WireFormat for IeeeAddr {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self(read_array(buf)?))
    }
}

impl fmt::Display for IeeeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().rev().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for IeeeAddr {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let digits = digits.strip_prefix("0x").unwrap_or(&digits);
        if digits.len() != 16 {
            return Err(ProtocolError::InvalidAddress(s.to_string()));
        }
        let value = u64::from_str_radix(digits, 16)
            .map_err(|_| ProtocolError::InvalidAddress(s.to_string()))?;
        Ok(Self::from_u64(value))
    }
}

impl Serialize for IeeeAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for IeeeAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Sentinel short address for an unknown device.
pub const UNKNOWN_SHORT_ADDR: u16 = 0xFFFF;

// ============================================================================
// Callback correlation
// ============================================================================

/// Application callback handle and context, echoed back verbatim by the
/// co-processor when an asynchronous operation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UserCallback {
    pub callback: u32,
    pub context: u32,
}

impl UserCallback {
    pub const SIZE: usize = 8;

    pub fn new(callback: u32, context: u32) -> Self {
        Self { callback, context }
    }

    pub fn is_set(&self) -> bool {
        self.callback != 0
    }
}

impl WireFormat for UserCallback {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.callback);
        buf.put_u32_le(self.context);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, Self::SIZE)?;
        Ok(Self {
            callback: buf.get_u32_le(),
            context: buf.get_u32_le(),
        })
    }
}

// ============================================================================
// Network lifecycle
// ============================================================================

/// Parameters for forming a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormNetworkParams {
    pub role: DeviceRole,
    pub install_code_policy: bool,
    pub max_children: u8,
    pub ed_timeout: u8,
    pub keep_alive: u32,
}

impl Default for FormNetworkParams {
    fn default() -> Self {
        Self {
            role: DeviceRole::Coordinator,
            install_code_policy: false,
            max_children: 10,
            ed_timeout: 8,
            keep_alive: 3000,
        }
    }
}

impl WireFormat for FormNetworkParams {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.role as u8);
        buf.put_u8(self.install_code_policy as u8);
        buf.put_u8(self.max_children);
        buf.put_u8(self.ed_timeout);
        buf.put_u32_le(self.keep_alive);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 8)?;
        Ok(Self {
            role: DeviceRole::try_from(buf.get_u8())?,
            install_code_policy: buf.get_u8() != 0,
            max_children: buf.get_u8(),
            ed_timeout: buf.get_u8(),
            keep_alive: buf.get_u32_le(),
        })
    }
}

/// Network formation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormationInfo {
    pub extended_pan_id: ExtendedPanId,
    pub pan_id: u16,
    pub channel: u8,
}

impl WireFormat for FormationInfo {
    fn write_to(&self, buf: &mut BytesMut) {
        self.extended_pan_id.write_to(buf);
        buf.put_u16_le(self.pan_id);
        buf.put_u8(self.channel);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 11)?;
        Ok(Self {
            extended_pan_id: IeeeAddr::read_from(buf)?,
            pan_id: buf.get_u16_le(),
            channel: buf.get_u8(),
        })
    }
}

/// A device joined or rejoined the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAnnounce {
    pub short_addr: u16,
    pub ieee_addr: IeeeAddr,
    pub capability: u8,
}

impl WireFormat for DeviceAnnounce {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.short_addr);
        self.ieee_addr.write_to(buf);
        buf.put_u8(self.capability);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 11)?;
        Ok(Self {
            short_addr: buf.get_u16_le(),
            ieee_addr: IeeeAddr::read_from(buf)?,
            capability: buf.get_u8(),
        })
    }
}

/// A device left the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveIndication {
    pub short_addr: u16,
    pub ieee_addr: IeeeAddr,
    pub rejoin: bool,
}

impl WireFormat for LeaveIndication {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.short_addr);
        self.ieee_addr.write_to(buf);
        buf.put_u8(self.rejoin as u8);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 11)?;
        Ok(Self {
            short_addr: buf.get_u16_le(),
            ieee_addr: IeeeAddr::read_from(buf)?,
            rejoin: buf.get_u8() != 0,
        })
    }
}

/// Active scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRequest {
    pub channel_mask: u32,
    pub scan_duration: u8,
}

impl WireFormat for ScanRequest {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.channel_mask);
        buf.put_u8(self.scan_duration);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 5)?;
        Ok(Self {
            channel_mask: buf.get_u32_le(),
            scan_duration: buf.get_u8(),
        })
    }
}

/// One network found by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub pan_id: u16,
    pub permit_joining: bool,
    pub extended_pan_id: ExtendedPanId,
    pub logical_channel: u8,
}

impl WireFormat for NetworkDescriptor {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.pan_id);
        buf.put_u8(self.permit_joining as u8);
        self.extended_pan_id.write_to(buf);
        buf.put_u8(self.logical_channel);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 12)?;
        Ok(Self {
            pan_id: buf.get_u16_le(),
            permit_joining: buf.get_u8() != 0,
            extended_pan_id: IeeeAddr::read_from(buf)?,
            logical_channel: buf.get_u8(),
        })
    }
}

/// Scan completion report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanComplete {
    pub status: u8,
    pub networks: Vec<NetworkDescriptor>,
}

impl WireFormat for ScanComplete {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.status);
        buf.put_u8(self.networks.len().min(u8::MAX as usize) as u8);
        for network in self.networks.iter().take(u8::MAX as usize) {
            network.write_to(buf);
        }
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 2)?;
        let status = buf.get_u8();
        let count = buf.get_u8() as usize;
        let networks = (0..count)
            .map(|_| NetworkDescriptor::read_from(buf))
            .collect::<Result<_, _>>()?;
        Ok(Self { status, networks })
    }
}

/// Key material paired with the owning device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkKeyInfo {
    pub ieee_addr: IeeeAddr,
    pub key: [u8; 16],
}

impl WireFormat for LinkKeyInfo {
    fn write_to(&self, buf: &mut BytesMut) {
        self.ieee_addr.write_to(buf);
        buf.put_slice(&self.key);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self {
            ieee_addr: IeeeAddr::read_from(buf)?,
            key: read_array(buf)?,
        })
    }
}

// ============================================================================
// Cluster library
// ============================================================================

/// Simple descriptor of an application endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub app_flags: u8,
    pub input_clusters: Vec<u16>,
    pub output_clusters: Vec<u16>,
}

impl EndpointDescriptor {
    /// Checks that both cluster lists fit their count fields.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        check_cluster_counts(&self.input_clusters, &self.output_clusters)
    }
}

impl WireFormat for EndpointDescriptor {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.endpoint);
        buf.put_u16_le(self.profile_id);
        buf.put_u16_le(self.device_id);
        buf.put_u8(self.app_flags);
        buf.put_u8(self.input_clusters.len() as u8);
        buf.put_u8(self.output_clusters.len() as u8);
        for cluster in self.input_clusters.iter().chain(&self.output_clusters) {
            buf.put_u16_le(*cluster);
        }
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 8)?;
        let endpoint = buf.get_u8();
        let profile_id = buf.get_u16_le();
        let device_id = buf.get_u16_le();
        let app_flags = buf.get_u8();
        let inputs = buf.get_u8() as usize;
        let outputs = buf.get_u8() as usize;
        Ok(Self {
            endpoint,
            profile_id,
            device_id,
            app_flags,
            input_clusters: read_u16_list(buf, inputs)?,
            output_clusters: read_u16_list(buf, outputs)?,
        })
    }
}

// ============================================================================
// Binding and discovery
// ============================================================================

/// Completion of a bind or unbind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindComplete {
    pub status: u8,
    pub callback: UserCallback,
}

impl WireFormat for BindComplete {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.status);
        self.callback.write_to(buf);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self {
            status: u8::read_from(buf)?,
            callback: UserCallback::read_from(buf)?,
        })
    }
}

/// Splits a bind/unbind request into its opaque body and the trailing
/// callback record.
pub fn split_bind_request(input: &[u8]) -> Result<(&[u8], UserCallback), ProtocolError> {
    if input.len() <= UserCallback::SIZE {
        return Err(ProtocolError::Truncated {
            needed: UserCallback::SIZE + 1,
            available: input.len(),
        });
    }
    let (body, mut record) = input.split_at(input.len() - UserCallback::SIZE);
    Ok((body, UserCallback::read_from(&mut record)?))
}

/// Builds a bind/unbind request: opaque body followed by the callback record.
pub fn bind_request(body: &[u8], callback: UserCallback) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + UserCallback::SIZE);
    buf.put_slice(body);
    callback.write_to(&mut buf);
    buf.freeze()
}

/// Match-descriptor discovery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindMatchRequest {
    pub callback: UserCallback,
    pub dst_nwk_addr: u16,
    pub addr_of_interest: u16,
    pub profile_id: u16,
    pub input_clusters: Vec<u16>,
    pub output_clusters: Vec<u16>,
}

impl FindMatchRequest {
    /// Checks that both cluster lists fit their count fields.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        check_cluster_counts(&self.input_clusters, &self.output_clusters)
    }
}

impl WireFormat for FindMatchRequest {
    fn write_to(&self, buf: &mut BytesMut) {
        self.callback.write_to(buf);
        buf.put_u16_le(self.dst_nwk_addr);
        buf.put_u16_le(self.addr_of_interest);
        buf.put_u16_le(self.profile_id);
        buf.put_u8(self.input_clusters.len() as u8);
        buf.put_u8(self.output_clusters.len() as u8);
        for cluster in self.input_clusters.iter().chain(&self.output_clusters) {
            buf.put_u16_le(*cluster);
        }
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let callback = UserCallback::read_from(buf)?;
        ensure(buf, 8)?;
        let dst_nwk_addr = buf.get_u16_le();
        let addr_of_interest = buf.get_u16_le();
        let profile_id = buf.get_u16_le();
        let inputs = buf.get_u8() as usize;
        let outputs = buf.get_u8() as usize;
        Ok(Self {
            callback,
            dst_nwk_addr,
            addr_of_interest,
            profile_id,
            input_clusters: read_u16_list(buf, inputs)?,
            output_clusters: read_u16_list(buf, outputs)?,
        })
    }
}

/// Completion of a match-descriptor discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindMatchComplete {
    pub status: u8,
    pub short_addr: u16,
    pub endpoint: u8,
    pub callback: UserCallback,
}

impl WireFormat for FindMatchComplete {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.status);
        buf.put_u16_le(self.short_addr);
        buf.put_u8(self.endpoint);
        self.callback.write_to(buf);
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        ensure(buf, 4)?;
        Ok(Self {
            status: buf.get_u8(),
            short_addr: buf.get_u16_le(),
            endpoint: buf.get_u8(),
            callback: UserCallback::read_from(buf)?,
        })
    }
}

// ============================================================================
// Direct data
// ============================================================================

/// Answer to an APS indication or confirm poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApsPoll {
    /// Nothing queued; carries the current network state.
    Idle(NetworkState),
    /// Oldest queued event payload.
    Data(Bytes),
}

impl ApsPoll {
    pub fn parse(payload: Bytes) -> Result<Self, ProtocolError> {
        match payload.len() {
            0 => Err(ProtocolError::Truncated {
                needed: 1,
                available: 0,
            }),
            1 => Ok(ApsPoll::Idle(NetworkState::try_from(payload[0])?)),
            _ => Ok(ApsPoll::Data(payload)),
        }
    }
}

/// Reads a single status byte answer.
pub fn parse_status(payload: &[u8]) -> Result<Status, ProtocolError> {
    match payload {
        [raw] => Status::try_from(*raw),
        other => Err(ProtocolError::InvalidValue {
            field: "status length",
            value: other.len() as u32,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ieee_display_and_parse() {
        let addr = IeeeAddr([0xAB, 0x98, 0x09, 0xFF, 0xFF, 0x2E, 0x21, 0x00]);
        assert_eq!(addr.to_string(), "00:21:2e:ff:ff:09:98:ab");
        assert_eq!("00:21:2e:ff:ff:09:98:ab".parse::<IeeeAddr>().unwrap(), addr);
        assert_eq!("0x00212effff0998ab".parse::<IeeeAddr>().unwrap(), addr);
        assert!("00:21".parse::<IeeeAddr>().is_err());
        assert!("zz:21:2e:ff:ff:09:98:ab".parse::<IeeeAddr>().is_err());
    }

    #[test]
    fn test_ieee_serde() {
        let addr = IeeeAddr::from_u64(0x0011_2233_4455_6677);
        let yaml = serde_yaml::to_string(&addr).unwrap();
        assert!(yaml.contains("00:11:22:33:44:55:66:77"));
        let back: IeeeAddr = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_formation_info_layout() {
        let info = FormationInfo {
            extended_pan_id: IeeeAddr([1, 2, 3, 4, 5, 6, 7, 8]),
            pan_id: 0x1A62,
            channel: 13,
        };
        let bytes = info.to_bytes();
        assert_eq!(
            &bytes[..],
            &[1, 2, 3, 4, 5, 6, 7, 8, 0x62, 0x1A, 13]
        );
        assert_eq!(FormationInfo::from_bytes(&bytes).unwrap(), info);
    }

    #[test]
    fn test_truncated_payload() {
        let result = DeviceAnnounce::from_bytes(&[0x01, 0x02, 0x03]);
        assert!(matches!(
            result,
            Err(ProtocolError::Truncated {
                needed: 11,
                available: 3
            })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let result = u16::from_bytes(&[0x01, 0x02, 0x03]);
        assert!(matches!(result, Err(ProtocolError::InvalidValue { .. })));
    }

    #[test]
    fn test_scan_complete() {
        let report = ScanComplete {
            status: 0,
            networks: vec![
                NetworkDescriptor {
                    pan_id: 0x1234,
                    permit_joining: true,
                    extended_pan_id: IeeeAddr::from_u64(42),
                    logical_channel: 11,
                },
                NetworkDescriptor {
                    pan_id: 0xBEEF,
                    permit_joining: false,
                    extended_pan_id: IeeeAddr::from_u64(7),
                    logical_channel: 25,
                },
            ],
        };
        let bytes = report.to_bytes();
        assert_eq!(bytes.len(), 2 + 2 * 12);
        assert_eq!(bytes[1], 2);
        assert_eq!(ScanComplete::from_bytes(&bytes).unwrap(), report);

        // Count claims more descriptors than present
        let mut short = bytes.to_vec();
        short.truncate(2 + 12 + 5);
        assert!(ScanComplete::from_bytes(&short).is_err());
    }

    #[test]
    fn test_bind_request_callback_at_end() {
        let record = UserCallback::new(0x11223344, 0x55667788);
        let request = bind_request(&[0xAA, 0xBB, 0xCC], record);

        assert_eq!(&request[..3], &[0xAA, 0xBB, 0xCC]);
        assert_eq!(&request[3..7], &0x11223344u32.to_le_bytes());

        let (body, parsed) = split_bind_request(&request).unwrap();
        assert_eq!(body, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(parsed, record);

        assert!(split_bind_request(&request[..8]).is_err());
    }

    #[test]
    fn test_find_match_callback_at_start() {
        let request = FindMatchRequest {
            callback: UserCallback::new(9, 10),
            dst_nwk_addr: 0x0000,
            addr_of_interest: 0xFFFD,
            profile_id: 0x0104,
            input_clusters: vec![0x0006],
            output_clusters: vec![0x0008, 0x0300],
        };
        let bytes = request.to_bytes();
        assert_eq!(&bytes[..4], &9u32.to_le_bytes());
        assert_eq!(bytes.len(), 8 + 8 + 3 * 2);
        assert_eq!(FindMatchRequest::from_bytes(&bytes).unwrap(), request);
    }

    #[test]
    fn test_endpoint_descriptor() {
        let ep = EndpointDescriptor {
            endpoint: 1,
            profile_id: 0x0104,
            device_id: 0x0005,
            app_flags: 0,
            input_clusters: vec![0x0000, 0x0003],
            output_clusters: vec![],
        };
        let bytes = ep.to_bytes();
        assert_eq!(bytes[6], 2);
        assert_eq!(bytes[7], 0);
        assert_eq!(EndpointDescriptor::from_bytes(&bytes).unwrap(), ep);
        assert!(EndpointDescriptor::from_bytes(&bytes[..9]).is_err());
    }

    #[test]
    fn test_cluster_counts_must_fit() {
        let mut ep = EndpointDescriptor {
            endpoint: 1,
            profile_id: 0x0104,
            device_id: 0x0005,
            app_flags: 0,
            input_clusters: vec![0x0006; 255],
            output_clusters: vec![],
        };
        assert!(ep.validate().is_ok());

        ep.input_clusters.push(0x0006);
        assert!(matches!(
            ep.validate(),
            Err(ProtocolError::InvalidValue {
                field: "input cluster count",
                value: 256
            })
        ));

        let request = FindMatchRequest {
            callback: UserCallback::default(),
            dst_nwk_addr: 0x0000,
            addr_of_interest: 0x0000,
            profile_id: 0x0104,
            input_clusters: vec![],
            output_clusters: vec![0x0008; 300],
        };
        assert!(matches!(
            request.validate(),
            Err(ProtocolError::InvalidValue {
                field: "output cluster count",
                value: 300
            })
        ));
    }

    #[test]
    fn test_form_network_rejects_bad_role() {
        let mut bytes = FormNetworkParams::default().to_bytes().to_vec();
        bytes[0] = 9;
        assert!(FormNetworkParams::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_aps_poll() {
        assert_eq!(
            ApsPoll::parse(Bytes::from_static(&[2])).unwrap(),
            ApsPoll::Idle(NetworkState::Connected)
        );
        assert!(matches!(
            ApsPoll::parse(Bytes::from_static(&[4, 0, 1])).unwrap(),
            ApsPoll::Data(_)
        ));
        assert!(ApsPoll::parse(Bytes::new()).is_err());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(&[0]).unwrap(), Status::Success);
        assert!(parse_status(&[]).is_err());
        assert!(parse_status(&[0, 0]).is_err());
    }
}
