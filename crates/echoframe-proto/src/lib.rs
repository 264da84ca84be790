//! Wire format for the echoframe WebSocket engine.
//!
//! A frame is a 2-byte base header, an optional 16- or 64-bit extended
//! length, an optional 4-byte masking key and the payload. Decoding is a
//! pull-based operation over a [`bytes::BytesMut`] buffer: it consumes
//! nothing until a whole frame is buffered, so the caller can keep appending
//! socket reads and retry.
//!
//! # Security
//!
//! The declared payload length is checked against the configured maximum as
//! soon as the length field is readable, before any payload buffer exists.
//! Reserved bits, reserved opcodes, fragmented or oversized control frames
//! and masking-direction violations are all rejected at the frame level.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod close;
pub mod errors;
pub mod flags;
pub mod frame;
pub mod header;
pub mod mask;
pub mod message;
pub mod opcodes;

pub use close::{CloseCode, CloseInfo};
pub use errors::{ProtocolError, Result};
pub use flags::FrameFlags;
pub use frame::{Frame, FrameCodec, Role};
pub use header::FrameHeader;
pub use mask::apply_mask;
pub use message::{Message, MessageKind};
pub use opcodes::Opcode;
