//! Frame-level view of the inbound queue.

use crate::bus::Bus;
use ncplink_protocol::{Decoder, Frame, ProtocolError};

/// Pulls received bytes off a [`Bus`] and yields decoded frames.
///
/// `next` is cancel-safe: bytes taken from the bus are kept in the decoder
/// until a frame is complete, so dropping a pending `next` inside a
/// `select!` loses nothing.
pub struct FrameReader<'a> {
    bus: &'a Bus,
    decoder: Decoder,
}

impl<'a> FrameReader<'a> {
    pub fn new(bus: &'a Bus) -> Self {
        Self {
            bus,
            decoder: Decoder::new(),
        }
    }

    pub fn with_decoder(bus: &'a Bus, decoder: Decoder) -> Self {
        Self { bus, decoder }
    }

    /// Returns the next frame or decode error, or `None` once the link has
    /// closed and no complete frame remains.
    pub async fn next(&mut self) -> Option<Result<Frame, ProtocolError>> {
        loop {
            match self.decoder.decode_frame() {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
            let chunk = self.bus.recv().await?;
            self.decoder.extend_bytes(chunk);
        }
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }
}
