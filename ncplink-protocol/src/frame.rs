//! Binary frame format.
//!
//! Frame layout (7 bytes header + payload + 2 bytes checksum), before stuffing:
//!
//! ```text
//! +----------------+----------+--------+--------+-------------+
//! | version | kind | reserved |   id   |   sn   | payload_len |
//! | 4 bits  |4 bits|  1 byte  | 2 bytes| 1 byte |   2 bytes   |
//! +----------------+----------+--------+--------+-------------+
//! | payload                                       | crc16     |
//! | payload_len bytes                             | 2 bytes   |
//! +-----------------------------------------------+-----------+
//! ```
//!
//! Multi-byte fields are little-endian. The checksum covers header and
//! payload. The whole frame is then SLIP-stuffed (see [`crate::slip`]).

use crate::error::ProtocolError;
use crate::slip;
use crate::status::Status;
use crate::{ERROR_RESPONSE_ID, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_IBM_SDLC};
use std::fmt;

/// Size of the fixed frame header in bytes (1+1+2+1+2 = 7).
pub const FRAME_HEADER_SIZE: usize = 7;

/// Size of the trailing checksum in bytes.
pub const CHECKSUM_SIZE: usize = 2;

/// Reflected CRC-16 with an all-ones seed.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Computes the frame checksum over `data`.
pub fn checksum(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Frame kind, stored in the high nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Expects exactly one response.
    Request = 0,
    /// Answers a prior request.
    Response = 1,
    /// Unsolicited, never answered.
    Notify = 2,
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameKind::Request),
            1 => Ok(FrameKind::Response),
            2 => Ok(FrameKind::Notify),
            other => Err(ProtocolError::InvalidKind(other)),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameKind::Request => "request",
            FrameKind::Response => "response",
            FrameKind::Notify => "notify",
        };
        write!(f, "{}", s)
    }
}

/// Fixed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub kind: FrameKind,
    pub id: u16,
    pub sn: u8,
    pub len: u16,
}

impl FrameHeader {
    /// Writes the header in wire order.
    pub fn put(&self, buf: &mut BytesMut) {
        // Version and kind (1 byte)
        buf.put_u8((self.version & 0x0F) | ((self.kind as u8) << 4));

        // Reserved (1 byte)
        buf.put_u8(0);

        // Command id (2 bytes)
        buf.put_u16_le(self.id);

        // Sequence number (1 byte)
        buf.put_u8(self.sn);

        // Payload length (2 bytes)
        buf.put_u16_le(self.len);
    }

    /// Parses a header from the front of `data` without consuming it.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort {
                len: data.len(),
                header: FRAME_HEADER_SIZE,
            });
        }

        let version = data[0] & 0x0F;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let kind = FrameKind::try_from(data[0] >> 4)?;

        Ok(Self {
            version,
            kind,
            id: u16::from_le_bytes([data[2], data[3]]),
            sn: data[4],
            len: u16::from_le_bytes([data[5], data[6]]),
        })
    }
}

/// A parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    /// Command identifier.
    pub id: u16,
    /// Sequence number. Used as the correlation token by the host.
    pub sn: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn request(id: impl Into<u16>, sn: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Request,
            id: id.into(),
            sn,
            payload: payload.into(),
        }
    }

    pub fn response(id: impl Into<u16>, sn: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Response,
            id: id.into(),
            sn,
            payload: payload.into(),
        }
    }

    pub fn notify(id: impl Into<u16>, sn: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Notify,
            id: id.into(),
            sn,
            payload: payload.into(),
        }
    }

    /// Creates the response sent when a request could not be served.
    pub fn error_response(sn: u8, status: Status) -> Self {
        Self::response(ERROR_RESPONSE_ID, sn, vec![status.as_u8()])
    }

    /// Returns true for a response signalling a dispatch failure.
    pub fn is_error_response(&self) -> bool {
        self.kind == FrameKind::Response && self.id == ERROR_RESPONSE_ID
    }

    /// Returns the status carried by an error response.
    pub fn error_status(&self) -> Option<Status> {
        if !self.is_error_response() {
            return None;
        }
        let raw = *self.payload.first()?;
        Status::try_from(raw).ok()
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            version: PROTOCOL_VERSION,
            kind: self.kind,
            id: self.id,
            sn: self.sn,
            len: self.payload.len() as u16,
        }
    }

    /// Serializes `header || payload || checksum` without stuffing.
    pub fn to_bytes(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        self.put(&mut buf)?;
        Ok(buf)
    }

    /// Appends the unstuffed serialization to `buf`.
    pub fn put(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let start = buf.len();
        buf.reserve(FRAME_HEADER_SIZE + self.payload.len() + CHECKSUM_SIZE);
        self.header().put(buf);
        buf.put_slice(&self.payload);

        let crc = checksum(&buf[start..]);
        buf.put_u16_le(crc);
        Ok(())
    }

    /// Serializes and stuffs the frame, ready for the bus.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let raw = self.to_bytes()?;
        Ok(slip::encode(&raw))
    }

    /// Decodes one frame from the front of an unstuffed buffer.
    ///
    /// Consumes exactly `header + payload + checksum` bytes on success. On
    /// error the buffer is left untouched so the caller can discard it.
    pub fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let header = FrameHeader::parse(buf)?;

        let declared = header.len as usize;
        // `parse` guarantees a full header is present.
        let body = buf.len() - FRAME_HEADER_SIZE;
        if body < declared + CHECKSUM_SIZE {
            return Err(ProtocolError::LengthMismatch {
                declared,
                available: body.saturating_sub(CHECKSUM_SIZE),
            });
        }

        let covered = FRAME_HEADER_SIZE + declared;
        let expected = u16::from_le_bytes([buf[covered], buf[covered + 1]]);
        let actual = checksum(&buf[..covered]);
        if actual != expected {
            return Err(ProtocolError::CrcMismatch { expected, actual });
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(declared);
        buf.advance(CHECKSUM_SIZE);

        Ok(Self {
            kind: header.kind,
            id: header.id,
            sn: header.sn,
            payload,
        })
    }

    /// Iterates over the frames packed back-to-back in an unstuffed buffer.
    pub fn parse_all(buf: Bytes) -> Frames {
        Frames {
            buf,
            failed: false,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} id={:#06x} sn={} len={}",
            self.kind,
            self.id,
            self.sn,
            self.payload.len()
        )
    }
}

/// Iterator returned by [`Frame::parse_all`].
///
/// Yields every well-formed frame in order. The first malformed remainder is
/// reported once as an error, after which the rest of the buffer is dropped.
#[derive(Debug)]
pub struct Frames {
    buf: Bytes,
    failed: bool,
}

impl Iterator for Frames {
    type Item = Result<Frame, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        match Frame::decode(&mut self.buf) {
            Ok(frame) => Some(Ok(frame)),
            Err(e) => {
                self.failed = true;
                self.buf.clear();
                Some(Err(e))
            }
        }
    }
}
