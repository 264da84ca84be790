//! Client error types.

use echoframe_core::HandshakeError;
use echoframe_proto::{CloseInfo, ProtocolError};
use thiserror::Error;

/// Errors surfaced by [`crate::Client`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// Server rejected or botched the opening handshake
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Server sent something the wire protocol forbids
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server sent a Close frame while a message was expected
    #[error("closed by server: {}", .0.as_ref().map_or_else(|| "no status".to_string(), ToString::to_string))]
    Closed(Option<CloseInfo>),

    /// Stream ended without a Close frame
    #[error("connection closed without a close frame")]
    ConnectionClosed,
}
