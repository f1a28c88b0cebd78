//! Protocol error types.

use thiserror::Error;

/// Errors raised while stuffing, framing or parsing payloads.
///
/// Every variant describes a malformed input. None of them are fatal to the
/// link: callers drop the offending packet and resynchronize on the next
/// frame-end marker.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid escape sequence: ESC followed by {0:#04x}")]
    InvalidEscape(u8),

    #[error("truncated escape sequence at end of packet")]
    TruncatedEscape,

    #[error("unterminated packet: stream does not end with a frame-end marker")]
    Unterminated,

    #[error("packet too large: {size} bytes without a frame-end marker (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("frame too short: {len} bytes (header is {header} bytes)")]
    FrameTooShort { len: usize, header: usize },

    #[error("length mismatch: header declares {declared} payload bytes, {available} available")]
    LengthMismatch { declared: usize, available: usize },

    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid frame kind: {0}")]
    InvalidKind(u8),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("truncated payload: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("invalid value for {field}: {value:#x}")]
    InvalidValue { field: &'static str, value: u32 },

    #[error("unknown {field}: {name}")]
    UnknownName { field: &'static str, name: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl ProtocolError {
    /// Returns true for errors caused by bytes damaged in transit, as opposed
    /// to a well-formed frame carrying a payload the receiver cannot parse.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidEscape(_)
                | ProtocolError::TruncatedEscape
                | ProtocolError::Unterminated
                | ProtocolError::FrameTooShort { .. }
                | ProtocolError::LengthMismatch { .. }
                | ProtocolError::CrcMismatch { .. }
                | ProtocolError::InvalidKind(_)
                | ProtocolError::UnsupportedVersion(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::CrcMismatch {
            expected: 0x1234,
            actual: 0x00ff,
        };
        assert_eq!(err.to_string(), "CRC mismatch: expected 0x1234, got 0x00ff");

        let err = ProtocolError::InvalidEscape(0x41);
        assert_eq!(
            err.to_string(),
            "invalid escape sequence: ESC followed by 0x41"
        );

        let err = ProtocolError::LengthMismatch {
            declared: 10,
            available: 4,
        };
        assert_eq!(
            err.to_string(),
            "length mismatch: header declares 10 payload bytes, 4 available"
        );
    }

    #[test]
    fn test_corruption_classification() {
        assert!(ProtocolError::TruncatedEscape.is_corruption());
        assert!(ProtocolError::CrcMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(!ProtocolError::Truncated {
            needed: 2,
            available: 1
        }
        .is_corruption());
        assert!(!ProtocolError::PacketTooLarge { size: 10, max: 5 }.is_corruption());
    }
}
