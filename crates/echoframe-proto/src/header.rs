//! Frame header layout.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! Header parsing is incremental: [`FrameHeader::parse`] returns `Ok(None)`
//! while the buffer is too short, and validates every field as soon as the
//! bytes that carry it are available.

use bytes::{BufMut, BytesMut};
use zerocopy::{
    FromBytes,
    byteorder::big_endian::{U16, U64},
};

use crate::{FrameFlags, Opcode, ProtocolError, Result};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

const MASK_BIT: u8 = 0x80;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// FIN and RSV bits
    pub flags: FrameFlags,
    /// Frame opcode
    pub opcode: Opcode,
    /// Masking key, present iff the MASK bit is set
    pub mask: Option<[u8; 4]>,
    /// Payload length in bytes
    pub payload_len: u64,
}

impl FrameHeader {
    /// Smallest possible header (2 bytes).
    pub const MIN_SIZE: usize = 2;

    /// Largest possible header (2 + 8 + 4 bytes).
    pub const MAX_SIZE: usize = 14;

    /// Create a header for an unmasked frame.
    pub fn new(opcode: Opcode, fin: bool, payload_len: u64) -> Self {
        let flags = if fin { FrameFlags::FIN } else { FrameFlags::empty() };
        Self { flags, opcode, mask: None, payload_len }
    }

    /// Check if this is the final fragment.
    pub fn is_fin(&self) -> bool {
        self.flags.is_fin()
    }

    /// Parse a header from the front of `src`.
    ///
    /// Returns the header and its encoded length, or `None` if more bytes
    /// are needed. Nothing is consumed; the caller advances the buffer.
    ///
    /// # Errors
    ///
    /// - `ReservedBits` if any RSV bit is set
    /// - `UnknownOpcode` for reserved opcodes
    /// - `FragmentedControlFrame` / `ControlFrameTooLarge` for invalid
    ///   control frames
    /// - `ReservedLengthBit` if the 64-bit length has its top bit set
    /// - `PayloadTooLarge` if the declared length exceeds `max_payload`
    pub fn parse(src: &[u8], max_payload: u64) -> Result<Option<(Self, usize)>> {
        let [first, second, rest @ ..] = src else {
            return Ok(None);
        };

        let flags = FrameFlags::from_first_byte(*first);
        if flags.has_reserved() {
            return Err(ProtocolError::ReservedBits((flags & FrameFlags::RESERVED).bits()));
        }

        let raw_opcode = first & 0x0F;
        let opcode = Opcode::from_u8(raw_opcode).ok_or(ProtocolError::UnknownOpcode(raw_opcode))?;

        let masked = second & MASK_BIT != 0;
        let len7 = second & !MASK_BIT;

        if opcode.is_control() {
            if !flags.is_fin() {
                return Err(ProtocolError::FragmentedControlFrame(opcode));
            }
            if u64::from(len7) > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolError::ControlFrameTooLarge(u64::from(len7)));
            }
        }

        let (payload_len, rest) = match len7 {
            LEN_16 => {
                let Ok((len, rest)) = U16::read_from_prefix(rest) else {
                    return Ok(None);
                };
                (u64::from(len.get()), rest)
            },
            LEN_64 => {
                let Ok((len, rest)) = U64::read_from_prefix(rest) else {
                    return Ok(None);
                };
                let len = len.get();
                if len & (1 << 63) != 0 {
                    return Err(ProtocolError::ReservedLengthBit);
                }
                (len, rest)
            },
            short => (u64::from(short), rest),
        };

        if payload_len > max_payload {
            return Err(ProtocolError::PayloadTooLarge { size: payload_len, max: max_payload });
        }

        let mask = if masked {
            let Ok((key, _)) = <[u8; 4]>::read_from_prefix(rest) else {
                return Ok(None);
            };
            Some(key)
        } else {
            None
        };

        let header = Self { flags, opcode, mask, payload_len };
        Ok(Some((header, header.encoded_len())))
    }

    /// Number of bytes this header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        let ext = match self.payload_len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        let mask = if self.mask.is_some() { 4 } else { 0 };
        Self::MIN_SIZE + ext + mask
    }

    /// Append the header to `dst` using the minimal length encoding.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.flags.bits() | self.opcode.to_u8());

        let mask_bit = if self.mask.is_some() { MASK_BIT } else { 0 };
        match self.payload_len {
            len @ 0..=125 => dst.put_u8(mask_bit | len as u8),
            len @ 126..=0xFFFF => {
                dst.put_u8(mask_bit | LEN_16);
                dst.put_u16(len as u16);
            },
            len => {
                dst.put_u8(mask_bit | LEN_64);
                dst.put_u64(len);
            },
        }

        if let Some(key) = self.mask {
            dst.put_slice(&key);
        }
    }
}
