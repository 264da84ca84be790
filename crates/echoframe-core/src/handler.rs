//! Session handlers.
//!
//! A handler is the application slot of a connection: it sees every
//! complete message and may answer with one message. The engine frames and
//! writes the answer in the order the triggering messages were received.

use echoframe_proto::{CloseInfo, Message};

/// Application logic bound to one connection.
pub trait MessageHandler: Send + 'static {
    /// Handle a complete message, optionally returning a reply.
    fn on_message(&mut self, message: Message) -> Option<Message>;

    /// Called once when the connection ends, with the peer's close info if
    /// it sent one.
    fn on_close(&mut self, _info: Option<&CloseInfo>) {}
}

/// Sends every message back unchanged, preserving its kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl MessageHandler for EchoHandler {
    fn on_message(&mut self, message: Message) -> Option<Message> {
        Some(message)
    }
}
