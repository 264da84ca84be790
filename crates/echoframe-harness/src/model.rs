//! Reference model of an echo connection.
//!
//! The model states what a peer should observe for a sequence of
//! [`Operation`]s without any framing, buffering or state machine: every
//! message comes back whole, every Ping comes back as a Pong, and the first
//! Close or violation ends the exchange.
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┴──────────────┐
//!           ▼                             ▼
//!       ModelPeer                    scenario::Peer
//!      (reference)           (real Connection + codec)
//!           └──────────── compare ────────┘
//! ```

use bytes::Bytes;
use echoframe_proto::{CloseCode, CloseInfo, Frame, Message};

use crate::scenario::Step;

/// Something a client does to an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Send a message in fragments of at most `max_fragment` bytes
    /// (0 sends one frame)
    Send {
        /// Message to send
        message: Message,
        /// Largest fragment payload
        max_fragment: usize,
    },
    /// Send a fragmented message with a Ping after its first fragment.
    /// The message must be longer than `max_fragment`, which must be
    /// non-zero.
    PingMidMessage {
        /// Message to send
        message: Message,
        /// Largest fragment payload
        max_fragment: usize,
        /// Ping payload (at most 125 bytes)
        payload: Bytes,
    },
    /// Send a Ping (at most 125 bytes)
    Ping(Bytes),
    /// Send an unsolicited Pong
    Pong(Bytes),
    /// Send a Close frame, with a status code or empty
    Close(Option<u16>),
    /// Send a text frame that is not valid UTF-8
    InvalidUtf8,
}

impl Operation {
    /// Script steps performing this operation.
    pub fn steps(&self) -> Vec<Step> {
        match self {
            Self::Send { message, max_fragment } => {
                vec![Step::Fragmented { message: message.clone(), max_fragment: *max_fragment }]
            },
            Self::PingMidMessage { message, max_fragment, payload } => {
                let mut frames = message.clone().into_frames(*max_fragment);
                let rest = frames.split_off(1.min(frames.len()));
                vec![
                    Step::Frames(frames),
                    Step::Ping(payload.clone()),
                    Step::Frames(rest),
                ]
            },
            Self::Ping(payload) => vec![Step::Ping(payload.clone())],
            Self::Pong(payload) => vec![Step::Pong(payload.clone())],
            Self::Close(code) => {
                vec![Step::Close(code.map(|c| CloseInfo::code_only(CloseCode::new(c))))]
            },
            Self::InvalidUtf8 => vec![Step::Frames(vec![Frame::text(vec![0xC3u8, 0x28])])],
        }
    }
}

/// Expected observations of one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelPeer {
    /// Messages the server should send back
    pub echoed: Vec<Message>,
    /// Pong payloads the server should send
    pub pongs: Vec<Bytes>,
    /// Status code of the server's Close frame
    pub close: Option<CloseCode>,
    /// The exchange is over
    pub closed: bool,
    /// Both Close frames were exchanged
    pub clean: bool,
}

impl ModelPeer {
    /// Fresh, open peer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one operation. Operations after the close are ignored.
    pub fn apply(&mut self, op: &Operation) {
        if self.closed {
            return;
        }

        match op {
            Operation::Send { message, .. } => self.echoed.push(message.clone()),
            Operation::PingMidMessage { message, payload, .. } => {
                self.pongs.push(payload.clone());
                self.echoed.push(message.clone());
            },
            Operation::Ping(payload) => self.pongs.push(payload.clone()),
            Operation::Pong(_) => {},
            Operation::Close(None) => self.finish(CloseCode::NORMAL, true),
            Operation::Close(Some(code)) => {
                let code = CloseCode::new(*code);
                if code.is_valid_on_wire() {
                    self.finish(code, true);
                } else {
                    self.finish(CloseCode::PROTOCOL_ERROR, false);
                }
            },
            Operation::InvalidUtf8 => self.finish(CloseCode::INVALID_PAYLOAD, false),
        }
    }

    fn finish(&mut self, code: CloseCode, clean: bool) {
        self.close = Some(code);
        self.closed = true;
        self.clean = clean;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_ends_exchange() {
        let mut model = ModelPeer::new();
        model.apply(&Operation::Send { message: Message::text("a"), max_fragment: 0 });
        model.apply(&Operation::Close(Some(4000)));
        model.apply(&Operation::Ping(Bytes::from_static(b"late")));

        assert_eq!(model.echoed, vec![Message::text("a")]);
        assert!(model.pongs.is_empty());
        assert_eq!(model.close, Some(CloseCode::new(4000)));
        assert!(model.clean);
    }

    #[test]
    fn reserved_code_is_a_violation() {
        let mut model = ModelPeer::new();
        model.apply(&Operation::Close(Some(1005)));
        assert_eq!(model.close, Some(CloseCode::PROTOCOL_ERROR));
        assert!(!model.clean);
    }

    #[test]
    fn ping_lands_between_fragments() {
        let op = Operation::PingMidMessage {
            message: Message::text("abcdef"),
            max_fragment: 2,
            payload: Bytes::from_static(b"p"),
        };
        let steps = op.steps();
        assert_eq!(steps.len(), 3);
        assert!(matches!(&steps[0], Step::Frames(f) if f.len() == 1 && !f[0].fin));
        assert!(matches!(&steps[2], Step::Frames(f) if f.len() == 2));
    }
}
