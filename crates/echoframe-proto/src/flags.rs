//! Flag bits of the first header byte.

use bitflags::bitflags;

bitflags! {
    /// High nibble of the first header byte.
    ///
    /// No extensions are negotiated, so any RSV bit on an incoming frame is a
    /// protocol error.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u8 {
        /// Final fragment of a message
        const FIN = 0b1000_0000;
        /// Reserved for extensions
        const RSV1 = 0b0100_0000;
        /// Reserved for extensions
        const RSV2 = 0b0010_0000;
        /// Reserved for extensions
        const RSV3 = 0b0001_0000;

        /// All reserved bits
        const RESERVED = Self::RSV1.bits() | Self::RSV2.bits() | Self::RSV3.bits();
    }
}

impl FrameFlags {
    /// Extract the flags from the first header byte, ignoring the opcode
    /// nibble.
    pub fn from_first_byte(byte: u8) -> Self {
        Self::from_bits_truncate(byte & 0xF0)
    }

    /// Check if this is the final fragment.
    pub fn is_fin(self) -> bool {
        self.contains(Self::FIN)
    }

    /// Check if any reserved bit is set.
    pub fn has_reserved(self) -> bool {
        self.intersects(Self::RESERVED)
    }
}
