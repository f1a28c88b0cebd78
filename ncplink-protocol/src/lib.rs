//! # ncplink-protocol
//!
//! Wire protocol for the host to network co-processor serial link.
//!
//! This crate provides:
//! - SLIP byte stuffing so frame boundaries survive a raw byte stream
//! - Frames with a packed 7-byte header and a CRC-16 trailer
//! - A streaming decoder that tolerates split and concatenated frames
//! - The command catalog, status codes and typed payload records
//! - Read-only dispatch tables shared by both link endpoints

pub mod codec;
pub mod command;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod message;
pub mod slip;
pub mod status;

pub use codec::{Decoder, Encoder};
pub use command::Command;
pub use dispatch::{DispatchTable, DispatchTableBuilder, Handler, HandlerResult};
pub use error::ProtocolError;
pub use frame::{Frame, FrameHeader, FrameKind, CHECKSUM_SIZE, FRAME_HEADER_SIZE};
pub use message::{IeeeAddr, UserCallback, WireFormat};
pub use status::{DeviceRole, NetworkState, SecurityMode, Status};

/// Protocol version carried in every frame header.
pub const PROTOCOL_VERSION: u8 = 0;

/// Maximum payload size, bounded by the 16-bit length field.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Command identifier of the response sent when a request cannot be served.
pub const ERROR_RESPONSE_ID: u16 = 0xFFFF;

/// Default TCP port for a co-processor exposed over the network.
pub const DEFAULT_PORT: u16 = 5540;
