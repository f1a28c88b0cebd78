//! Streaming encoder and decoder for stuffed frames.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::slip;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// Default limit on bytes accumulated without seeing a frame-end marker.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 2 * (crate::MAX_PAYLOAD_SIZE + 16);

/// Encodes frames for the wire.
pub struct Encoder;

impl Encoder {
    /// Encodes a single frame.
    pub fn encode(frame: &Frame) -> Result<BytesMut, ProtocolError> {
        frame.encode()
    }

    /// Packs several frames into one stuffed packet.
    pub fn encode_batch<'a>(
        frames: impl IntoIterator<Item = &'a Frame>,
    ) -> Result<BytesMut, ProtocolError> {
        let mut raw = BytesMut::new();
        for frame in frames {
            frame.put(&mut raw)?;
        }
        Ok(slip::encode(&raw))
    }
}

/// Incremental decoder fed with raw bytes from the bus.
///
/// Bytes are split into packets at each frame-end marker. Every packet is
/// un-stuffed and may carry several frames. A malformed packet produces one
/// error and decoding resumes with the next packet.
pub struct Decoder {
    buffer: BytesMut,
    ready: VecDeque<Result<Frame, ProtocolError>>,
    max_packet_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            ready: VecDeque::new(),
            max_packet_size,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            if let Some(next) = self.ready.pop_front() {
                return next.map(Some);
            }

            let Some(end) = self.buffer.iter().position(|&b| b == slip::END) else {
                if self.buffer.len() > self.max_packet_size {
                    let size = self.buffer.len();
                    self.buffer.clear();
                    return Err(ProtocolError::PacketTooLarge {
                        size,
                        max: self.max_packet_size,
                    });
                }
                return Ok(None);
            };

            let packet = self.buffer.split_to(end + 1);
            let body = &packet[..end];
            if body.is_empty() {
                continue;
            }

            match slip::unstuff(body) {
                Ok(raw) => self.ready.extend(Frame::parse_all(raw.freeze())),
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears buffered bytes and any decoded frames not yet returned.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.ready.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameKind;

    fn drain(decoder: &mut Decoder) -> Vec<Result<Frame, ProtocolError>> {
        let mut out = Vec::new();
        loop {
            match decoder.decode_frame() {
                Ok(Some(frame)) => out.push(Ok(frame)),
                Ok(None) => break,
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    #[test]
    fn test_decoder_partial_frame() {
        let frame = Frame::request(0x0001u16, 1, vec![0x01]);
        let encoded = frame.encode().unwrap();
        let (head, tail) = encoded.split_at(5);

        let mut decoder = Decoder::new();
        decoder.extend(head);
        assert!(decoder.decode_frame().unwrap().is_none());

        decoder.extend(tail);
        assert_eq!(decoder.decode_frame().unwrap().unwrap(), frame);
        assert!(decoder.decode_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_byte_at_a_time() {
        let frame = Frame::notify(0x0005u16, 2, vec![0xC0, 0xB4]);
        let encoded = frame.encode().unwrap();

        let mut decoder = Decoder::new();
        let mut decoded = Vec::new();
        for byte in encoded.iter() {
            decoder.extend(&[*byte]);
            if let Some(f) = decoder.decode_frame().unwrap() {
                decoded.push(f);
            }
        }
        assert_eq!(decoded, vec![frame]);
    }

    #[test]
    fn test_decoder_batch_packet() {
        let first = Frame::request(0x000Bu16, 1, Bytes::new());
        let second = Frame::request(0x0013u16, 2, Bytes::new());
        let packet = Encoder::encode_batch([&first, &second]).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&packet);
        let frames = drain(&mut decoder);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref().unwrap().id, 0x000B);
        assert_eq!(frames[1].as_ref().unwrap().id, 0x0013);
    }

    #[test]
    fn test_decoder_resyncs_after_corruption() {
        let bad = Frame::request(0x0001u16, 1, vec![0x01]);
        let good = Frame::request(0x0002u16, 2, Bytes::new());

        let mut stream = bad.encode().unwrap();
        let len = stream.len();
        stream[len - 2] ^= 0x01; // last checksum byte
        stream.extend_from_slice(&good.encode().unwrap());

        let mut decoder = Decoder::new();
        decoder.extend(&stream);
        let frames = drain(&mut decoder);

        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(ProtocolError::CrcMismatch { .. })));
        assert_eq!(frames[1].as_ref().unwrap(), &good);
    }

    #[test]
    fn test_decoder_short_packets_are_errors() {
        let good = Frame::response(0x0006u16, 3, vec![0x00]);
        let mut stream = BytesMut::from(&[slip::END, 0, 0, 1, 0, 1, 0, 0, slip::END][..]);
        stream.extend_from_slice(&[slip::END, 0, 0, 1, 0, 1, 0, 0, 0x11, slip::END]);
        stream.extend_from_slice(&good.encode().unwrap());

        let mut decoder = Decoder::new();
        decoder.extend(&stream);
        let frames = drain(&mut decoder);

        assert_eq!(frames.len(), 3);
        assert!(matches!(
            frames[0],
            Err(ProtocolError::LengthMismatch { declared: 0, .. })
        ));
        assert!(matches!(
            frames[1],
            Err(ProtocolError::LengthMismatch { declared: 0, .. })
        ));
        assert_eq!(frames[2].as_ref().unwrap(), &good);
    }

    #[test]
    fn test_decoder_bad_escape() {
        let good = Frame::notify(0x0004u16, 5, vec![1, 2, 3]);
        let mut stream = BytesMut::from(&[slip::END, 0x00, slip::ESC, 0x01, slip::END][..]);
        stream.extend_from_slice(&good.encode().unwrap());

        let mut decoder = Decoder::new();
        decoder.extend(&stream);

        assert!(matches!(
            decoder.decode_frame(),
            Err(ProtocolError::InvalidEscape(0x01))
        ));
        let next = decoder.decode_frame().unwrap().unwrap();
        assert_eq!(next.kind, FrameKind::Notify);
    }

    #[test]
    fn test_decoder_packet_too_large() {
        let mut decoder = Decoder::with_max_packet_size(8);
        decoder.extend(&[0x01; 9]);
        assert!(matches!(
            decoder.decode_frame(),
            Err(ProtocolError::PacketTooLarge { size: 9, max: 8 })
        ));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_clear() {
        let mut decoder = Decoder::new();
        decoder.extend(&[slip::END, 0x01, 0x02]);
        assert_eq!(decoder.buffered(), 3);
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }
}
