//! # ncplink-bus
//!
//! Byte transport between a link endpoint and its frame processing.
//!
//! A [`Bus`] owns an inbound and an outbound [`ByteQueue`] and, once
//! started, a receive task and a transmit task over any
//! `AsyncRead + AsyncWrite` transport. [`LinkStream`] covers the usual
//! transports and [`FrameReader`] turns received bytes into frames.

pub mod bus;
pub mod error;
pub mod queue;
pub mod reader;
pub mod stream;

pub use bus::{Bus, BusConfig, BusStats, SerialParams};
pub use error::BusError;
pub use queue::ByteQueue;
pub use reader::FrameReader;
pub use stream::LinkStream;
