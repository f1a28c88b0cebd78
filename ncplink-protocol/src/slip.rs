//! SLIP byte stuffing (RFC 1055).
//!
//! ```text
//! plain:    01 C0 02 DB 03
//! stuffed:  C0 01 DB DC 02 DB DD 03 C0
//! ```
//!
//! Every encoded packet starts and ends with [`END`]. Inside a packet the two
//! marker bytes never appear verbatim, so a receiver that loses sync only has
//! to wait for the next [`END`].

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};

/// Frame-end marker.
pub const END: u8 = 0xC0;
/// Escape marker.
pub const ESC: u8 = 0xDB;
/// Substitute for [`END`] after an escape.
pub const ESC_END: u8 = 0xDC;
/// Substitute for [`ESC`] after an escape.
pub const ESC_ESC: u8 = 0xDD;

/// Worst-case stuffed size for `len` plain bytes.
pub fn max_encoded_len(len: usize) -> usize {
    len * 2 + 2
}

/// Stuffs `data` into a self-delimiting packet.
pub fn encode(data: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(encoded_len(data));
    encode_into(data, &mut buf);
    buf
}

/// Appends the stuffed form of `data` to `buf`.
pub fn encode_into(data: &[u8], buf: &mut BytesMut) {
    buf.reserve(encoded_len(data));
    buf.put_u8(END);
    for &byte in data {
        match byte {
            END => buf.put_slice(&[ESC, ESC_END]),
            ESC => buf.put_slice(&[ESC, ESC_ESC]),
            other => buf.put_u8(other),
        }
    }
    buf.put_u8(END);
}

/// Reverses [`encode`] on a complete stream.
///
/// [`END`] bytes are treated as delimiters wherever they appear, so a stream
/// holding several back-to-back packets decodes into their concatenation.
/// The stream must finish with [`END`]; anything else is a truncated packet.
/// On failure no partial output is returned.
pub fn decode(stream: &[u8]) -> Result<BytesMut, ProtocolError> {
    match stream.last() {
        Some(&END) => {}
        Some(_) => return Err(ProtocolError::Unterminated),
        None => return Ok(BytesMut::new()),
    }

    let mut out = BytesMut::with_capacity(stream.len());
    for packet in stream.split(|&b| b == END) {
        unstuff_into(packet, &mut out)?;
    }
    Ok(out)
}

/// Un-stuffs the body of one packet (the bytes between two [`END`] markers).
pub fn unstuff(packet: &[u8]) -> Result<BytesMut, ProtocolError> {
    let mut out = BytesMut::with_capacity(packet.len());
    unstuff_into(packet, &mut out)?;
    Ok(out)
}

fn unstuff_into(packet: &[u8], out: &mut BytesMut) -> Result<(), ProtocolError> {
    let mut bytes = packet.iter();
    while let Some(&byte) = bytes.next() {
        if byte != ESC {
            out.put_u8(byte);
            continue;
        }
        match bytes.next() {
            Some(&ESC_END) => out.put_u8(END),
            Some(&ESC_ESC) => out.put_u8(ESC),
            Some(&other) => return Err(ProtocolError::InvalidEscape(other)),
            None => return Err(ProtocolError::TruncatedEscape),
        }
    }
    Ok(())
}

fn encoded_len(data: &[u8]) -> usize {
    2 + data.len() + data.iter().filter(|&&b| b == END || b == ESC).count()
}
