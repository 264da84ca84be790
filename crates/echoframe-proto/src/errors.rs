//! Protocol error types.
//!
//! Every variant is terminal for the connection: a corrupted framing stream
//! has no mid-stream recovery. [`ProtocolError::close_code`] tells the engine
//! which status code to put in its best-effort Close frame.

use thiserror::Error;

use crate::{CloseCode, Opcode};

/// Result type for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Framing, sequencing and payload violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// RSV1-3 set without a negotiated extension
    #[error("reserved header bits set: 0x{0:02X}")]
    ReservedBits(u8),

    /// Opcode in a reserved range
    #[error("unknown opcode: 0x{0:X}")]
    UnknownOpcode(u8),

    /// Control frame with FIN cleared
    #[error("fragmented control frame: {0:?}")]
    FragmentedControlFrame(Opcode),

    /// Control frame payload above 125 bytes
    #[error("control frame payload too large: {0} bytes (max 125)")]
    ControlFrameTooLarge(u64),

    /// High bit of the 64-bit extended length set
    #[error("64-bit payload length has its most significant bit set")]
    ReservedLengthBit,

    /// Declared frame payload exceeds the configured maximum
    #[error("frame payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Declared length
        size: u64,
        /// Configured maximum
        max: u64,
    },

    /// Reassembled message exceeds the configured maximum
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Accumulated length including the offending frame
        size: u64,
        /// Configured maximum
        max: u64,
    },

    /// Frame sent by a client without a masking key
    #[error("client frame is not masked")]
    UnmaskedFrame,

    /// Frame sent by a server with a masking key
    #[error("server frame is masked")]
    MaskedFrame,

    /// Continuation frame without a message in progress
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    /// New data message started before the previous one finished
    #[error("expected continuation frame, got {0:?}")]
    ExpectedContinuation(Opcode),

    /// Text message or close reason is not valid UTF-8
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Close payload of exactly one byte
    #[error("close payload must be empty or at least 2 bytes, got {0}")]
    InvalidClosePayload(usize),

    /// Close code that must never appear on the wire
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Close reason longer than 123 bytes
    #[error("close reason too long: {0} bytes (max 123)")]
    CloseReasonTooLong(usize),
}

impl ProtocolError {
    /// Status code to send in the Close frame that reports this error.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::InvalidUtf8(_) => CloseCode::INVALID_PAYLOAD,
            Self::PayloadTooLarge { .. } | Self::MessageTooLarge { .. } => {
                CloseCode::MESSAGE_TOO_BIG
            },
            _ => CloseCode::PROTOCOL_ERROR,
        }
    }
}
