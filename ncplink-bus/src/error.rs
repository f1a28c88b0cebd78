//! Bus error types.

use ncplink_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the bus layer.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("out of memory: cannot allocate {requested} byte queue")]
    OutOfMemory { requested: usize },

    #[error("invalid bus configuration: {0}")]
    InvalidConfig(String),

    #[error("bus already started")]
    AlreadyStarted,

    #[error("bus not started")]
    NotStarted,

    #[error("backpressure: {len} bytes did not fit in {free} free bytes within {timeout:?}")]
    Backpressure {
        len: usize,
        free: usize,
        timeout: Duration,
    },

    #[error("queue full: {len} bytes offered, {free} free")]
    QueueFull { len: usize, free: usize },

    #[error("bus closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl BusError {
    /// Returns whether retrying the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Backpressure { .. } | BusError::QueueFull { .. })
    }
}
