//! Connection error types.

use echoframe_proto::ProtocolError;
use thiserror::Error;

use crate::{connection::ConnectionState, handshake::HandshakeError};

/// Errors surfaced by the connection state machine and its drivers.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Opening handshake rejected
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Peer violated the wire protocol
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Underlying transport failed
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Operation timed out
    #[error("{operation} timed out")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
    },

    /// Operation not valid in current state
    #[error("cannot {operation} in state {state:?}")]
    InvalidState {
        /// Current connection state
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },
}
