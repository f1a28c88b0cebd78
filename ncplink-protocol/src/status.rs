//! Status codes and small enumerations carried in single payload bytes.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result status returned by command handlers on either side of the link.
///
/// These values are part of the wire contract and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Status {
    Success = 0,
    Fatal = 1,
    BadArgument = 2,
    NoMemory = 3,
    Unsupported = 4,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Returns whether retrying the same request may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Status::NoMemory)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Status {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Success),
            1 => Ok(Status::Fatal),
            2 => Ok(Status::BadArgument),
            3 => Ok(Status::NoMemory),
            4 => Ok(Status::Unsupported),
            other => Err(ProtocolError::InvalidValue {
                field: "status",
                value: other as u32,
            }),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "SUCCESS",
            Status::Fatal => "FATAL",
            Status::BadArgument => "BAD_ARGUMENT",
            Status::NoMemory => "NO_MEMORY",
            Status::Unsupported => "UNSUPPORTED",
        };
        write!(f, "{}", s)
    }
}

/// Network state reported by the co-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NetworkState {
    #[default]
    Offline = 0,
    Joining = 1,
    Connected = 2,
    Leaving = 3,
    Confirm = 4,
    Indication = 5,
}

impl TryFrom<u8> for NetworkState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NetworkState::Offline),
            1 => Ok(NetworkState::Joining),
            2 => Ok(NetworkState::Connected),
            3 => Ok(NetworkState::Leaving),
            4 => Ok(NetworkState::Confirm),
            5 => Ok(NetworkState::Indication),
            other => Err(ProtocolError::InvalidValue {
                field: "network_state",
                value: other as u32,
            }),
        }
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkState::Offline => "offline",
            NetworkState::Joining => "joining",
            NetworkState::Connected => "connected",
            NetworkState::Leaving => "leaving",
            NetworkState::Confirm => "confirm",
            NetworkState::Indication => "indication",
        };
        write!(f, "{}", s)
    }
}

/// Network security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SecurityMode {
    #[default]
    NoSecurity = 0,
    PreconfiguredNetworkKey = 1,
}

impl TryFrom<u8> for SecurityMode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SecurityMode::NoSecurity),
            1 => Ok(SecurityMode::PreconfiguredNetworkKey),
            other => Err(ProtocolError::InvalidValue {
                field: "security_mode",
                value: other as u32,
            }),
        }
    }
}

/// Zigbee device role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeviceRole {
    #[default]
    Coordinator = 0,
    Router = 1,
    EndDevice = 2,
}

impl TryFrom<u8> for DeviceRole {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeviceRole::Coordinator),
            1 => Ok(DeviceRole::Router),
            2 => Ok(DeviceRole::EndDevice),
            other => Err(ProtocolError::InvalidValue {
                field: "role",
                value: other as u32,
            }),
        }
    }
}

impl std::str::FromStr for DeviceRole {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coordinator" | "zc" => Ok(DeviceRole::Coordinator),
            "router" | "zr" => Ok(DeviceRole::Router),
            "end_device" | "end-device" | "zed" => Ok(DeviceRole::EndDevice),
            _ => Err(ProtocolError::UnknownName {
                field: "role",
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceRole::Coordinator => "coordinator",
            DeviceRole::Router => "router",
            DeviceRole::EndDevice => "end_device",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_stable() {
        assert_eq!(Status::Success.as_u8(), 0);
        assert_eq!(Status::Fatal.as_u8(), 1);
        assert_eq!(Status::BadArgument.as_u8(), 2);
        assert_eq!(Status::NoMemory.as_u8(), 3);
        assert_eq!(Status::Unsupported.as_u8(), 4);
        assert!(Status::try_from(5).is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Unsupported.to_string(), "UNSUPPORTED");
        assert_eq!(Status::BadArgument.to_string(), "BAD_ARGUMENT");
    }

    #[test]
    fn test_network_state_roundtrip() {
        for raw in 0..=5u8 {
            let state = NetworkState::try_from(raw).unwrap();
            assert_eq!(state as u8, raw);
        }
        assert!(NetworkState::try_from(6).is_err());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("router".parse::<DeviceRole>().unwrap(), DeviceRole::Router);
        assert_eq!("ZED".parse::<DeviceRole>().unwrap(), DeviceRole::EndDevice);
        assert!("gateway".parse::<DeviceRole>().is_err());
        assert!(DeviceRole::try_from(3).is_err());
    }
}
