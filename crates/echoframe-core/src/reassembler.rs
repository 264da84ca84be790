//! Message reassembly.
//!
//! Data frames accumulate until a frame with FIN closes the message. The
//! first frame announces the kind (Text/Binary); every later frame must be a
//! Continuation. Text is validated as UTF-8 once, on completion, so frame
//! boundaries may split a multi-byte sequence.
//!
//! Control frames are not part of any message. The connection handles them
//! before they reach the reassembler, which leaves an in-progress message
//! untouched.

use bytes::{Bytes, BytesMut};
use echoframe_proto::{Frame, Message, MessageKind, Opcode, ProtocolError};

/// Message in progress.
#[derive(Debug)]
struct Partial {
    kind: MessageKind,
    buf: BytesMut,
}

/// Accumulator for fragmented messages.
#[derive(Debug)]
pub struct Reassembler {
    max_message_size: u64,
    partial: Option<Partial>,
}

impl Reassembler {
    /// Create a reassembler rejecting messages above `max_message_size`
    /// bytes.
    pub fn new(max_message_size: u64) -> Self {
        Self { max_message_size, partial: None }
    }

    /// Check if a fragmented message is in progress.
    pub fn is_in_progress(&self) -> bool {
        self.partial.is_some()
    }

    /// Bytes accumulated for the message in progress.
    pub fn buffered_len(&self) -> usize {
        self.partial.as_ref().map_or(0, |p| p.buf.len())
    }

    /// Discard any message in progress.
    pub fn reset(&mut self) {
        self.partial = None;
    }

    /// Feed one data frame.
    ///
    /// Returns the completed message when `frame` carries FIN. The returned
    /// message owns the payload; nothing is retained.
    ///
    /// # Errors
    ///
    /// - `UnexpectedContinuation` for a Continuation with nothing in progress
    /// - `ExpectedContinuation` for a Text/Binary frame mid-message
    /// - `MessageTooLarge` when the accumulated size exceeds the limit
    /// - `InvalidUtf8` when a completed text message is not UTF-8
    ///
    /// Any error discards the message in progress.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        let result = self.push_inner(frame);
        if result.is_err() {
            self.partial = None;
        }
        result
    }

    fn push_inner(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        match (frame.opcode, self.partial.as_mut()) {
            (Opcode::Text | Opcode::Binary, Some(_)) => {
                Err(ProtocolError::ExpectedContinuation(frame.opcode))
            },
            (Opcode::Continuation, None) => Err(ProtocolError::UnexpectedContinuation),
            (Opcode::Text | Opcode::Binary, None) => {
                let kind = match frame.opcode {
                    Opcode::Text => MessageKind::Text,
                    _ => MessageKind::Binary,
                };
                self.check_size(frame.payload.len() as u64)?;

                if frame.fin {
                    return finish(kind, frame.payload).map(Some);
                }
                self.partial = Some(Partial { kind, buf: BytesMut::from(&frame.payload[..]) });
                Ok(None)
            },
            (Opcode::Continuation, Some(partial)) => {
                let total = partial.buf.len() as u64 + frame.payload.len() as u64;
                if total > self.max_message_size {
                    return Err(ProtocolError::MessageTooLarge {
                        size: total,
                        max: self.max_message_size,
                    });
                }
                partial.buf.extend_from_slice(&frame.payload);

                if !frame.fin {
                    return Ok(None);
                }
                match self.partial.take() {
                    Some(Partial { kind, buf }) => finish(kind, buf.freeze()).map(Some),
                    None => Ok(None),
                }
            },
            // Control frames never belong to a message.
            (Opcode::Close | Opcode::Ping | Opcode::Pong, _) => Ok(None),
        }
    }

    fn check_size(&self, size: u64) -> Result<(), ProtocolError> {
        if size > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge { size, max: self.max_message_size });
        }
        Ok(())
    }
}

fn finish(kind: MessageKind, payload: Bytes) -> Result<Message, ProtocolError> {
    match kind {
        MessageKind::Binary => Ok(Message::Binary(payload)),
        MessageKind::Text => String::from_utf8(Vec::from(payload))
            .map(Message::Text)
            .map_err(|_| ProtocolError::InvalidUtf8("text message")),
    }
}
