//! Frames and the frame codec.
//!
//! A [`Frame`] is an opcode-tagged struct: the opcode says how to interpret
//! the payload, `fin` says whether it ends a message. Frames held in memory
//! are always unmasked; the masking key only lives on the wire.

use bytes::{Buf, Bytes, BytesMut};

use crate::{
    CloseInfo, FrameHeader, MessageKind, Opcode, ProtocolError, Result, flags::FrameFlags,
    mask::apply_mask,
};

/// One wire-level unit of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message
    pub fin: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Unmasked payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame.
    pub fn new(opcode: Opcode, fin: bool, payload: impl Into<Bytes>) -> Self {
        Self { fin, opcode, payload: payload.into() }
    }

    /// Single-frame text message.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, true, payload)
    }

    /// Single-frame binary message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, true, payload)
    }

    /// Continuation fragment.
    pub fn continuation(fin: bool, payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Continuation, fin, payload)
    }

    /// Ping with an application payload (at most 125 bytes).
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, true, payload)
    }

    /// Pong echoing a ping payload.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, true, payload)
    }

    /// Close frame. `None` sends an empty payload (no status code).
    pub fn close(info: Option<&CloseInfo>) -> Self {
        let payload = info.map(CloseInfo::encode).unwrap_or_default();
        Self::new(Opcode::Close, true, payload)
    }

    /// Split a message into a sequenced list of frames.
    ///
    /// The first frame carries the message opcode, the rest are
    /// Continuation frames; only the last has `fin` set. A `max_fragment`
    /// of 0 or an empty payload yields a single frame.
    pub fn fragments(kind: MessageKind, payload: Bytes, max_fragment: usize) -> Vec<Self> {
        let opcode = kind.opcode();
        if max_fragment == 0 || payload.len() <= max_fragment {
            return vec![Self::new(opcode, true, payload)];
        }

        let count = payload.len().div_ceil(max_fragment);
        let mut frames = Vec::with_capacity(count);
        let mut rest = payload;
        while !rest.is_empty() {
            let chunk = rest.split_to(max_fragment.min(rest.len()));
            let opcode = if frames.is_empty() { opcode } else { Opcode::Continuation };
            frames.push(Self::new(opcode, rest.is_empty(), chunk));
        }
        frames
    }

    /// Header describing this frame with the given masking key.
    pub fn header(&self, mask: Option<[u8; 4]>) -> FrameHeader {
        let flags = if self.fin { FrameFlags::FIN } else { FrameFlags::empty() };
        FrameHeader { flags, opcode: self.opcode, mask, payload_len: self.payload.len() as u64 }
    }

    /// Append the wire encoding to `dst`, masking the payload if a key is
    /// given.
    pub fn encode(&self, mask: Option<[u8; 4]>, dst: &mut BytesMut) {
        let header = self.header(mask);
        dst.reserve(header.encoded_len() + self.payload.len());
        header.encode(dst);

        let start = dst.len();
        dst.extend_from_slice(&self.payload);
        if let Some(key) = mask {
            apply_mask(&mut dst[start..], key);
        }
    }
}

/// Which side of the connection a codec serves.
///
/// Clients mask every frame they send; servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Decodes masked frames, encodes unmasked frames
    Server,
    /// Decodes unmasked frames, encodes masked frames
    Client,
}

/// Frame codec for one side of a connection.
///
/// Decoding is stateless between calls: a frame is only consumed from the
/// buffer once every byte of it has arrived.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    role: Role,
    max_payload: u64,
}

impl FrameCodec {
    /// Default maximum frame payload (16 MiB).
    pub const DEFAULT_MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

    /// Create a codec for `role` with the default payload limit.
    pub fn new(role: Role) -> Self {
        Self { role, max_payload: Self::DEFAULT_MAX_PAYLOAD }
    }

    /// Server-side codec.
    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    /// Client-side codec.
    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    /// Set the maximum accepted frame payload.
    #[must_use]
    pub fn with_max_payload(mut self, max_payload: u64) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Codec role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Maximum accepted frame payload.
    pub fn max_payload(&self) -> u64 {
        self.max_payload
    }

    /// Decode one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` without consuming anything if the frame is not
    /// complete yet. On success the frame's bytes are removed from `src` and
    /// the payload is unmasked.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some((header, header_len)) = FrameHeader::parse(&src[..], self.max_payload)? else {
            return Ok(None);
        };

        match (self.role, header.mask) {
            (Role::Server, None) => return Err(ProtocolError::UnmaskedFrame),
            (Role::Client, Some(_)) => return Err(ProtocolError::MaskedFrame),
            _ => {},
        }

        // Bounded by max_payload, which fits in memory by configuration.
        let payload_len = header.payload_len as usize;
        if src.len() < header_len + payload_len {
            src.reserve(header_len + payload_len - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let mut payload = src.split_to(payload_len);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame { fin: header.is_fin(), opcode: header.opcode, payload: payload.freeze() }))
    }

    /// Encode `frame` for this side of the connection.
    ///
    /// Client codecs must be given a fresh masking key per frame; server
    /// codecs ignore `mask` and always send unmasked frames.
    pub fn encode(&self, frame: &Frame, mask: [u8; 4], dst: &mut BytesMut) {
        match self.role {
            Role::Server => frame.encode(None, dst),
            Role::Client => frame.encode(Some(mask), dst),
        }
    }
}
