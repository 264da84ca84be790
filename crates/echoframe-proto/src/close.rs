//! Close frame payloads.
//!
//! A Close payload is either empty or a big-endian status code followed by
//! an optional UTF-8 reason. The whole payload is a control-frame payload,
//! so the reason is limited to 123 bytes.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{ProtocolError, Result};

/// Maximum reason length: 125-byte control payload minus the 2-byte code.
pub const MAX_REASON_LEN: usize = 123;

/// Close status code.
///
/// Codes not listed as constants still pass through verbatim, as long as
/// they are allowed on the wire (see [`CloseCode::is_valid_on_wire`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(u16);

impl CloseCode {
    /// Normal closure
    pub const NORMAL: Self = Self(1000);
    /// Endpoint going away (server shutdown, idle timeout)
    pub const GOING_AWAY: Self = Self(1001);
    /// Protocol error
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// Data type the endpoint cannot accept
    pub const UNSUPPORTED_DATA: Self = Self(1003);
    /// No status code was present (never sent on the wire)
    pub const NO_STATUS: Self = Self(1005);
    /// Connection dropped without a Close frame (never sent on the wire)
    pub const ABNORMAL: Self = Self(1006);
    /// Payload inconsistent with the message type (invalid UTF-8)
    pub const INVALID_PAYLOAD: Self = Self(1007);
    /// Generic policy violation
    pub const POLICY_VIOLATION: Self = Self(1008);
    /// Message too big to process
    pub const MESSAGE_TOO_BIG: Self = Self(1009);
    /// Client expected an extension the server did not negotiate
    pub const MANDATORY_EXTENSION: Self = Self(1010);
    /// Unexpected server condition
    pub const INTERNAL_ERROR: Self = Self(1011);

    /// Wrap a raw status code.
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Raw status code.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Check whether this code may appear in a Close frame.
    ///
    /// 1005, 1006 and 1015 are reserved for local reporting; 1004 and
    /// 1016-2999 are reserved by the protocol; anything outside 1000-4999 is
    /// invalid.
    pub const fn is_valid_on_wire(self) -> bool {
        matches!(self.0, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.0
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status code and reason carried by a Close frame.
///
/// Immutable once constructed; the reason is guaranteed to fit a control
/// frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    code: CloseCode,
    reason: String,
}

impl CloseInfo {
    /// Create close info, rejecting reasons longer than 123 bytes.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Result<Self> {
        let reason = reason.into();
        if reason.len() > MAX_REASON_LEN {
            return Err(ProtocolError::CloseReasonTooLong(reason.len()));
        }
        Ok(Self { code, reason })
    }

    /// Close info without a reason.
    pub fn code_only(code: CloseCode) -> Self {
        Self { code, reason: String::new() }
    }

    /// Normal closure without a reason.
    pub fn normal() -> Self {
        Self::code_only(CloseCode::NORMAL)
    }

    /// Status code.
    pub fn code(&self) -> CloseCode {
        self.code
    }

    /// Reason text (may be empty).
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Parse a Close frame payload.
    ///
    /// Returns `None` for an empty payload (no status code present).
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        match payload {
            [] => Ok(None),
            [_] => Err(ProtocolError::InvalidClosePayload(1)),
            [hi, lo, reason @ ..] => {
                let code = CloseCode::new(u16::from_be_bytes([*hi, *lo]));
                if !code.is_valid_on_wire() {
                    return Err(ProtocolError::InvalidCloseCode(code.get()));
                }
                let reason = std::str::from_utf8(reason)
                    .map_err(|_| ProtocolError::InvalidUtf8("close reason"))?;
                Self::new(code, reason).map(Some)
            },
        }
    }

    /// Encode as a Close frame payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.reason.len());
        buf.put_u16(self.code.get());
        buf.put_slice(self.reason.as_bytes());
        buf.freeze()
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_payload() {
        assert_eq!(CloseInfo::parse(&[]).unwrap(), None);
    }

    #[test]
    fn parse_code_and_reason() {
        let info = CloseInfo::parse(b"\x03\xe8bye").unwrap().unwrap();
        assert_eq!(info.code(), CloseCode::NORMAL);
        assert_eq!(info.reason(), "bye");
    }

    #[test]
    fn parse_code_only() {
        let info = CloseInfo::parse(&[0x03, 0xe9]).unwrap().unwrap();
        assert_eq!(info.code(), CloseCode::GOING_AWAY);
        assert_eq!(info.reason(), "");
    }

    #[test]
    fn one_byte_payload_rejected() {
        assert_eq!(CloseInfo::parse(&[0x03]), Err(ProtocolError::InvalidClosePayload(1)));
    }

    #[test]
    fn reserved_codes_rejected() {
        for code in [0u16, 999, 1004, 1005, 1006, 1015, 2000, 5000] {
            let payload = code.to_be_bytes();
            assert_eq!(
                CloseInfo::parse(&payload),
                Err(ProtocolError::InvalidCloseCode(code)),
                "code {code} must be rejected"
            );
        }
    }

    #[test]
    fn application_codes_pass_through() {
        for code in [3000u16, 3999, 4000, 4999, 1012] {
            let info = CloseInfo::parse(&code.to_be_bytes()).unwrap().unwrap();
            assert_eq!(info.code().get(), code);
        }
    }

    #[test]
    fn invalid_utf8_reason_is_1007() {
        let err = CloseInfo::parse(&[0x03, 0xe8, 0xff, 0xfe]).unwrap_err();
        assert_eq!(err.close_code(), CloseCode::INVALID_PAYLOAD);
    }

    #[test]
    fn reason_length_limit() {
        assert!(CloseInfo::new(CloseCode::NORMAL, "a".repeat(MAX_REASON_LEN)).is_ok());
        assert_eq!(
            CloseInfo::new(CloseCode::NORMAL, "a".repeat(MAX_REASON_LEN + 1)),
            Err(ProtocolError::CloseReasonTooLong(MAX_REASON_LEN + 1))
        );
    }

    #[test]
    fn encode_parse_roundtrip() {
        let info = CloseInfo::new(CloseCode::new(4001), "custom").unwrap();
        let encoded = info.encode();
        assert_eq!(&encoded[..2], &[0x0f, 0xa1]);
        assert_eq!(CloseInfo::parse(&encoded).unwrap(), Some(info));
    }
}
