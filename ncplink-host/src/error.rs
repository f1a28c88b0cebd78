//! Host error types.

use ncplink_bus::BusError;
use ncplink_protocol::command::describe;
use ncplink_protocol::Status;
use thiserror::Error;

/// Host errors.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ncplink_protocol::ProtocolError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request {} (sn {sn}) timed out", command_name(.command))]
    Timeout { command: u16, sn: u8 },

    #[error("request {} rejected: {status}", command_name(.command))]
    Rejected { command: u16, status: Status },

    #[error("unexpected payload for {}: {len} bytes", command_name(.command))]
    UnexpectedPayload { command: u16, len: usize },

    #[error("too many pending requests")]
    TooManyPending,
}

fn command_name(id: &u16) -> String {
    describe(*id)
}

impl HostError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            HostError::Timeout { .. } => true,
            HostError::TooManyPending => true,
            HostError::Bus(e) => e.is_retryable(),
            HostError::Rejected { status, .. } => status.is_retryable(),
            _ => false,
        }
    }

    /// Status reported by the co-processor, if it rejected the request.
    pub fn status(&self) -> Option<Status> {
        match self {
            HostError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}
