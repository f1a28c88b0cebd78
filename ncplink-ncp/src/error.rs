//! NCP error types.

use crate::config::ConfigError;
use ncplink_bus::BusError;
use ncplink_protocol::Status;
use thiserror::Error;

/// Errors raised by the co-processor side.
#[derive(Debug, Error)]
pub enum NcpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ncplink_protocol::ProtocolError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("a link is already being served")]
    AlreadyServing,

    #[error("engine rejected request: {0}")]
    Engine(Status),

    #[error("co-processor shutting down")]
    ShuttingDown,
}

impl NcpError {
    /// Maps the error to the status reported on the wire.
    pub fn status(&self) -> Status {
        match self {
            NcpError::Protocol(_) => Status::BadArgument,
            NcpError::Bus(BusError::OutOfMemory { .. }) => Status::NoMemory,
            NcpError::Engine(status) => *status,
            _ => Status::Fatal,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            NcpError::Bus(e) => e.is_retryable(),
            NcpError::Engine(status) => status.is_retryable(),
            _ => false,
        }
    }
}
