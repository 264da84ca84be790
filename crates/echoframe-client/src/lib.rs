//! WebSocket client driver.
//!
//! Drives the client side of the protocol over any `AsyncRead + AsyncWrite`
//! stream: performs the opening handshake, masks every outgoing frame with
//! a fresh key from the [`Environment`], and reassembles server messages.
//!
//! The client exposes low-level escape hatches ([`Client::send_frame`],
//! [`Client::send_raw`]) so tests can put arbitrary, even invalid, bytes on
//! the wire and observe how the server reacts.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;

use bytes::{Bytes, BytesMut};
use echoframe_core::{
    ClientHandshake, Environment, HandshakeError, HttpResponse, Reassembler,
    handshake::{DEFAULT_MAX_HEAD_SIZE, find_head_end},
};
use echoframe_proto::{CloseInfo, Frame, FrameCodec, Message, Opcode};
pub use error::ClientError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Something received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Complete data message
    Message(Message),
    /// Ping with its payload
    Ping(Bytes),
    /// Pong with its payload
    Pong(Bytes),
    /// Close frame (`None` when it carried no status code)
    Close(Option<CloseInfo>),
}

/// Client side of one WebSocket connection.
pub struct Client<S, E> {
    stream: S,
    env: E,
    codec: FrameCodec,
    reassembler: Reassembler,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S, E> Client<S, E>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    E: Environment,
{
    /// Perform the opening handshake for `path` on `host` over `stream`.
    ///
    /// Bytes the server sent after its response head are kept and decoded
    /// as frames.
    pub async fn connect(
        mut stream: S,
        host: &str,
        path: &str,
        env: E,
    ) -> Result<Self, ClientError> {
        let handshake = ClientHandshake::new(host, path, env.random_nonce());
        stream.write_all(&handshake.request_bytes()).await?;
        stream.flush().await?;

        let mut read_buf = BytesMut::with_capacity(1024);
        let head_len = loop {
            if let Some(end) = find_head_end(&read_buf) {
                break end;
            }
            if read_buf.len() > DEFAULT_MAX_HEAD_SIZE {
                return Err(HandshakeError::HeadTooLarge(read_buf.len()).into());
            }
            if stream.read_buf(&mut read_buf).await? == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        };

        let head = read_buf.split_to(head_len);
        let response = HttpResponse::parse(&head)?;
        handshake.validate(&response)?;
        debug!(host, path, "handshake complete");

        Ok(Self {
            stream,
            env,
            codec: FrameCodec::client(),
            reassembler: Reassembler::new(u64::MAX),
            read_buf,
            write_buf: BytesMut::new(),
        })
    }

    /// Send a message as a single frame.
    pub async fn send(&mut self, message: impl Into<Message>) -> Result<(), ClientError> {
        self.send_fragmented(message, 0).await
    }

    /// Send a message split into frames of at most `max_fragment` bytes.
    pub async fn send_fragmented(
        &mut self,
        message: impl Into<Message>,
        max_fragment: usize,
    ) -> Result<(), ClientError> {
        for frame in message.into().into_frames(max_fragment) {
            self.encode(&frame);
        }
        self.flush().await
    }

    /// Send one frame as-is (masked with a fresh key).
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        self.encode(frame);
        self.flush().await
    }

    /// Write raw bytes, bypassing framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send a Ping.
    pub async fn ping(&mut self, payload: impl Into<Bytes>) -> Result<(), ClientError> {
        self.send_frame(&Frame::ping(payload)).await
    }

    /// Receive the next event.
    ///
    /// Fragmented server messages are reassembled; control frames are
    /// returned as soon as they arrive.
    pub async fn recv(&mut self) -> Result<Event, ClientError> {
        loop {
            while let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                match frame.opcode {
                    Opcode::Ping => return Ok(Event::Ping(frame.payload)),
                    Opcode::Pong => return Ok(Event::Pong(frame.payload)),
                    Opcode::Close => return Ok(Event::Close(CloseInfo::parse(&frame.payload)?)),
                    _ => {
                        if let Some(message) = self.reassembler.push(frame)? {
                            return Ok(Event::Message(message));
                        }
                    },
                }
            }

            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }

    /// Receive the next data message, skipping pings and pongs.
    pub async fn recv_message(&mut self) -> Result<Message, ClientError> {
        loop {
            match self.recv().await? {
                Event::Message(message) => return Ok(message),
                Event::Close(info) => return Err(ClientError::Closed(info)),
                Event::Ping(_) | Event::Pong(_) => {},
            }
        }
    }

    /// Close the connection and wait for the server's Close frame.
    ///
    /// Data messages received in between are dropped. Returns the server's
    /// close info.
    pub async fn close(&mut self, info: Option<&CloseInfo>) -> Result<Option<CloseInfo>, ClientError> {
        self.send_frame(&Frame::close(info)).await?;
        loop {
            if let Event::Close(reply) = self.recv().await? {
                return Ok(reply);
            }
        }
    }

    /// Wait until the server shuts the stream down, discarding anything
    /// received.
    pub async fn wait_for_eof(&mut self) -> Result<(), ClientError> {
        loop {
            self.read_buf.clear();
            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return Ok(());
            }
        }
    }

    /// Underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn encode(&mut self, frame: &Frame) {
        let mask = self.env.random_mask();
        self.codec.encode(frame, mask, &mut self.write_buf);
    }

    async fn flush(&mut self) -> Result<(), ClientError> {
        let bytes = self.write_buf.split();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
