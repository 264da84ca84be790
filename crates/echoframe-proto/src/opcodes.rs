//! Frame opcodes.
//!
//! The opcode is the low nibble of the first header byte. Values 0x3-0x7 are
//! reserved for future data frames and 0xB-0xF for future control frames;
//! both ranges decode to `None` and are rejected by the codec.

/// WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented data message
    Continuation = 0x0,
    /// First (or only) frame of a text message
    Text = 0x1,
    /// First (or only) frame of a binary message
    Binary = 0x2,
    /// Close handshake
    Close = 0x8,
    /// Liveness probe, must be answered with a Pong
    Ping = 0x9,
    /// Answer to a Ping (or unsolicited heartbeat)
    Pong = 0xA,
}

impl Opcode {
    /// Convert from the 4-bit wire value.
    ///
    /// Returns `None` for reserved values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// 4-bit wire value.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Close, Ping and Pong. Control frames are never fragmented and carry
    /// at most 125 payload bytes.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Continuation, Text and Binary.
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}
