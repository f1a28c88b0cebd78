//! Command identifier catalog.
//!
//! Identifiers are grouped by functional area in the high byte:
//! `0x00xx` network/link, `0x01xx` cluster library, `0x02xx` device
//! objects, `0x03xx` direct data transfer.

use crate::error::ProtocolError;
use std::fmt;

macro_rules! commands {
    ($($variant:ident = $id:literal => $name:literal,)+) => {
        /// A known command identifier.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum Command {
            $($variant = $id,)+
        }

        impl Command {
            /// Every known command, in identifier order.
            pub const ALL: &'static [Command] = &[$(Command::$variant,)+];

            /// Looks up a command by its wire identifier.
            pub fn from_id(id: u16) -> Option<Self> {
                match id {
                    $($id => Some(Command::$variant),)+
                    _ => None,
                }
            }

            /// Returns the canonical upper-case name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Command::$variant => $name,)+
                }
            }
        }
    };
}

commands! {
    NetworkInit = 0x0000 => "NETWORK_INIT",
    NetworkStart = 0x0001 => "NETWORK_START",
    NetworkState = 0x0002 => "NETWORK_STATE",
    NetworkStackStatusHandler = 0x0003 => "NETWORK_STACK_STATUS_HANDLER",
    NetworkFormNetwork = 0x0004 => "NETWORK_FORMNETWORK",
    NetworkPermitJoining = 0x0005 => "NETWORK_PERMIT_JOINING",
    NetworkJoinNetwork = 0x0006 => "NETWORK_JOINNETWORK",
    NetworkLeaveNetwork = 0x0007 => "NETWORK_LEAVENETWORK",
    NetworkStartScan = 0x0008 => "NETWORK_START_SCAN",
    NetworkScanCompleteHandler = 0x0009 => "NETWORK_SCAN_COMPLETE_HANDLER",
    NetworkStopScan = 0x000A => "NETWORK_STOP_SCAN",
    NetworkPanIdGet = 0x000B => "NETWORK_PAN_ID_GET",
    NetworkPanIdSet = 0x000C => "NETWORK_PAN_ID_SET",
    NetworkExtendedPanIdGet = 0x000D => "NETWORK_EXTENDED_PAN_ID_GET",
    NetworkExtendedPanIdSet = 0x000E => "NETWORK_EXTENDED_PAN_ID_SET",
    NetworkPrimaryChannelGet = 0x000F => "NETWORK_PRIMARY_CHANNEL_GET",
    NetworkPrimaryChannelSet = 0x0010 => "NETWORK_PRIMARY_CHANNEL_SET",
    NetworkSecondaryChannelGet = 0x0011 => "NETWORK_SECONDARY_CHANNEL_GET",
    NetworkSecondaryChannelSet = 0x0012 => "NETWORK_SECONDARY_CHANNEL_SET",
    NetworkChannelGet = 0x0013 => "NETWORK_CHANNEL_GET",
    NetworkChannelSet = 0x0014 => "NETWORK_CHANNEL_SET",
    NetworkTxPowerGet = 0x0015 => "NETWORK_TXPOWER_GET",
    NetworkTxPowerSet = 0x0016 => "NETWORK_TXPOWER_SET",
    NetworkPrimaryKeyGet = 0x0017 => "NETWORK_PRIMARY_KEY_GET",
    NetworkPrimaryKeySet = 0x0018 => "NETWORK_PRIMARY_KEY_SET",
    NetworkFrameCountGet = 0x0019 => "NETWORK_FRAME_COUNT_GET",
    NetworkFrameCountSet = 0x001A => "NETWORK_FRAME_COUNT_SET",
    NetworkRoleGet = 0x001B => "NETWORK_ROLE_GET",
    NetworkRoleSet = 0x001C => "NETWORK_ROLE_SET",
    NetworkShortAddressGet = 0x001D => "NETWORK_SHORT_ADDRESS_GET",
    NetworkShortAddressSet = 0x001E => "NETWORK_SHORT_ADDRESS_SET",
    NetworkLongAddressGet = 0x001F => "NETWORK_LONG_ADDRESS_GET",
    NetworkLongAddressSet = 0x0020 => "NETWORK_LONG_ADDRESS_SET",
    NetworkChannelMasksGet = 0x0021 => "NETWORK_CHANNEL_MASKS_GET",
    NetworkChannelMasksSet = 0x0022 => "NETWORK_CHANNEL_MASKS_SET",
    NetworkUpdateIdGet = 0x0023 => "NETWORK_UPDATE_ID_GET",
    NetworkUpdateIdSet = 0x0024 => "NETWORK_UPDATE_ID_SET",
    NetworkTrustCenterAddrGet = 0x0025 => "NETWORK_TRUST_CENTER_ADDR_GET",
    NetworkTrustCenterAddrSet = 0x0026 => "NETWORK_TRUST_CENTER_ADDR_SET",
    NetworkLinkKeyGet = 0x0027 => "NETWORK_LINK_KEY_GET",
    NetworkLinkKeySet = 0x0028 => "NETWORK_LINK_KEY_SET",
    NetworkSecureModeGet = 0x0029 => "NETWORK_SECURE_MODE_GET",
    NetworkSecureModeSet = 0x002A => "NETWORK_SECURE_MODE_SET",
    NetworkPredefinedPanId = 0x002B => "NETWORK_PREDEFINED_PANID",
    NetworkShortToIeee = 0x002C => "NETWORK_SHORT_TO_IEEE",
    NetworkIeeeToShort = 0x002D => "NETWORK_IEEE_TO_SHORT",

    ZclEndpointAdd = 0x0100 => "ZCL_ENDPOINT_ADD",
    ZclEndpointDel = 0x0101 => "ZCL_ENDPOINT_DEL",
    ZclAttrRead = 0x0102 => "ZCL_ATTR_READ",
    ZclAttrWrite = 0x0103 => "ZCL_ATTR_WRITE",
    ZclAttrReport = 0x0104 => "ZCL_ATTR_REPORT",
    ZclAttrDisc = 0x0105 => "ZCL_ATTR_DISC",
    ZclRead = 0x0106 => "ZCL_READ",
    ZclWrite = 0x0107 => "ZCL_WRITE",
    ZclReportConfig = 0x0108 => "ZCL_REPORT_CONFIG",

    ZdoBindSet = 0x0200 => "ZDO_BIND_SET",
    ZdoUnbindSet = 0x0201 => "ZDO_UNBIND_SET",
    ZdoFindMatch = 0x0202 => "ZDO_FIND_MATCH",

    ApsDataRequest = 0x0300 => "APS_DATA_REQUEST",
    ApsDataIndication = 0x0301 => "APS_DATA_INDICATION",
    ApsDataConfirm = 0x0302 => "APS_DATA_CONFIRM",
}

impl Command {
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Cluster-library commands whose results come back as notifies with
    /// the same identifier.
    pub fn is_zcl_passthrough(self) -> bool {
        matches!(
            self,
            Command::ZclAttrRead
                | Command::ZclAttrWrite
                | Command::ZclAttrReport
                | Command::ZclAttrDisc
                | Command::ZclRead
                | Command::ZclWrite
                | Command::ZclReportConfig
        )
    }
}

impl From<Command> for u16 {
    fn from(command: Command) -> Self {
        command.id()
    }
}

impl TryFrom<u16> for Command {
    type Error = ProtocolError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Command::from_id(id).ok_or(ProtocolError::InvalidValue {
            field: "command",
            value: id as u32,
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase().replace('-', "_");
        Command::ALL
            .iter()
            .copied()
            .find(|c| {
                c.name() == upper || c.name().strip_prefix("NETWORK_") == Some(upper.as_str())
            })
            .ok_or_else(|| ProtocolError::UnknownName {
                field: "command",
                name: s.to_string(),
            })
    }
}

/// Formats an identifier with its name when known.
pub fn describe(id: u16) -> String {
    match Command::from_id(id) {
        Some(command) => format!("{} ({:#06x})", command.name(), id),
        None if id == crate::ERROR_RESPONSE_ID => format!("ERROR ({:#06x})", id),
        None => format!("UNKNOWN ({:#06x})", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_roundtrip() {
        for &command in Command::ALL {
            assert_eq!(Command::from_id(command.id()), Some(command));
        }
        assert_eq!(Command::from_id(0x0042), None);
        assert!(Command::try_from(0xFFFF).is_err());
    }

    #[test]
    fn test_catalog_is_sorted_and_unique() {
        let ids: Vec<u16> = Command::ALL.iter().map(|c| c.id()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_known_values() {
        assert_eq!(Command::NetworkStart.id(), 0x0001);
        assert_eq!(Command::NetworkIeeeToShort.id(), 0x002D);
        assert_eq!(Command::ZclReportConfig.id(), 0x0108);
        assert_eq!(Command::ZdoFindMatch.id(), 0x0202);
        assert_eq!(Command::ApsDataConfirm.id(), 0x0302);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            "network_start".parse::<Command>().unwrap(),
            Command::NetworkStart
        );
        assert_eq!("pan-id-get".parse::<Command>().unwrap(), Command::NetworkPanIdGet);
        assert_eq!("ZDO_BIND_SET".parse::<Command>().unwrap(), Command::ZdoBindSet);
        assert!("reboot".parse::<Command>().is_err());
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(0x0001), "NETWORK_START (0x0001)");
        assert_eq!(describe(0xFFFF), "ERROR (0xffff)");
        assert_eq!(describe(0x0999), "UNKNOWN (0x0999)");
    }
}
