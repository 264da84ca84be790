//! Connection state machine for the WebSocket engine.
//!
//! This module owns the lifecycle of one server-side connection: the
//! opening handshake, frame dispatch, message reassembly, heartbeats and the
//! closing handshake.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods accept time as parameter (no stored Environment)
//! - Methods return the actions the driver must execute, in order
//! - The driver owns the socket and is the only writer to it
//!
//! # State Machine
//!
//! ```text
//! ┌────────────┐ handshake ┌──────┐  close()   ┌──────────────┐
//! │ Connecting │──────────>│ Open │───────────>│ ClosingLocal │
//! └────────────┘           └──────┘            └──────────────┘
//!       │                     │                   │ peer Close / timeout
//!       │ rejected            │ peer Close        ↓
//!       │                     ↓              ┌────────┐
//!       │              ┌───────────────┐     │        │
//!       │              │ ClosingRemote │────>│ Closed │
//!       │              └───────────────┘     │        │
//!       └───────────────────────────────────>└────────┘
//!                   protocol error (any state)
//! ```
//!
//! # Actions
//!
//! - `SendHandshake`: write the 101 response
//! - `SendFrame`: encode and write a frame
//! - `Deliver`: hand a complete message to the session handler
//! - `Close`: flush pending writes, shut the transport down, then call
//!   [`Connection::finish`]
//!
//! Once `Closed`, every input is discarded.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use echoframe_proto::{
    CloseCode, CloseInfo, Frame, FrameCodec, Message, Opcode, ProtocolError, header::MAX_CONTROL_PAYLOAD,
};
use tracing::{debug, warn};

use crate::{
    close::{CloseNegotiation, CloseStep, Initiator},
    error::ConnectionError,
    handshake::ServerHandshake,
    reassembler::Reassembler,
};

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Write the handshake response
    SendHandshake(Bytes),

    /// Send this frame to the peer
    SendFrame(Frame),

    /// Pass a complete message to the session handler
    Deliver(Message),

    /// Shut the transport down after flushing pending writes
    Close {
        /// Reason for closing the connection
        reason: String,
    },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the opening handshake
    Connecting,
    /// Handshake complete, exchanging messages
    Open,
    /// Close frame sent, waiting for the peer's Close
    ClosingLocal,
    /// Peer's Close answered, waiting for the transport to shut down
    ClosingRemote,
    /// Terminal
    Closed,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest accepted frame payload
    pub max_frame_size: u64,
    /// Largest accepted reassembled message
    pub max_message_size: u64,
    /// How long to wait for the peer's Close after sending ours
    pub close_timeout: Duration,
    /// Split outgoing messages above this size (`None` never splits)
    pub fragment_threshold: Option<usize>,
    /// Send a Ping after this long without one (`None` disables)
    pub heartbeat_interval: Option<Duration>,
    /// Close with 1001 after this long without inbound frames (`None`
    /// disables)
    pub idle_timeout: Option<Duration>,
    /// Required request path (`None` accepts any)
    pub upgrade_path: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: FrameCodec::DEFAULT_MAX_PAYLOAD,
            max_message_size: 64 * 1024 * 1024,
            close_timeout: Duration::from_secs(5),
            fragment_threshold: None,
            heartbeat_interval: None,
            idle_timeout: None,
            upgrade_path: None,
        }
    }
}

/// Server-side connection state machine.
///
/// Pure state machine: no I/O, no stored Environment. The driver feeds it
/// bytes and time and executes the returned actions.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    config: ConnectionConfig,
    handshake: ServerHandshake,
    codec: FrameCodec,
    reassembler: Reassembler,
    close: CloseNegotiation,
    last_activity: Instant,
    last_heartbeat: Instant,
    failure: Option<ProtocolError>,
}

impl Connection {
    /// Create a connection in Connecting state.
    pub fn new(config: ConnectionConfig, now: Instant) -> Self {
        let handshake = match &config.upgrade_path {
            Some(path) => ServerHandshake::new().with_path(path.clone()),
            None => ServerHandshake::new(),
        };
        Self {
            state: ConnectionState::Connecting,
            handshake,
            codec: FrameCodec::server().with_max_payload(config.max_frame_size),
            reassembler: Reassembler::new(config.max_message_size),
            close: CloseNegotiation::new(config.close_timeout),
            last_activity: now,
            last_heartbeat: now,
            failure: None,
            config,
        }
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connection configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Check if the connection is Open.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Check if the connection reached Closed.
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Check if both Close frames were exchanged.
    pub fn is_clean(&self) -> bool {
        self.close.is_clean()
    }

    /// Side that closed first, if any.
    pub fn close_initiator(&self) -> Option<Initiator> {
        self.close.initiator()
    }

    /// Close info we sent.
    pub fn local_close(&self) -> Option<&CloseInfo> {
        self.close.sent()
    }

    /// Close info the peer sent.
    pub fn remote_close(&self) -> Option<&CloseInfo> {
        self.close.received()
    }

    /// Protocol error that tore the connection down, if any.
    pub fn failure(&self) -> Option<&ProtocolError> {
        self.failure.as_ref()
    }

    /// Process the opening handshake request head.
    ///
    /// On success the connection is Open and the 101 response is returned
    /// as an action.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if not Connecting
    /// - `Handshake` if the request is rejected; the connection is Closed
    ///   and the driver should write [`HandshakeError::rejection`] before
    ///   dropping the transport
    ///
    /// [`HandshakeError::rejection`]: crate::handshake::HandshakeError::rejection
    pub fn handshake(
        &mut self,
        head: &[u8],
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::InvalidState { state: self.state, operation: "handshake" });
        }

        match self.handshake.negotiate(head) {
            Ok(response) => {
                self.state = ConnectionState::Open;
                self.last_activity = now;
                self.last_heartbeat = now;
                Ok(vec![ConnectionAction::SendHandshake(response.to_bytes())])
            },
            Err(err) => {
                self.state = ConnectionState::Closed;
                Err(ConnectionError::Handshake(err))
            },
        }
    }

    /// Consume complete frames from `buf`.
    ///
    /// Stops after the first completed message, so the driver can answer it
    /// before later frames (a Close, for instance) change the state; call
    /// again while it returns a `Deliver`. An empty result means no complete
    /// frame is buffered.
    ///
    /// Partial frames stay in the buffer until more bytes arrive. Protocol
    /// errors do not surface as `Err`: they become a best-effort Close
    /// frame followed by `Close`, and [`Connection::failure`] records them.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` before the handshake completed.
    pub fn receive(
        &mut self,
        buf: &mut BytesMut,
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state == ConnectionState::Connecting {
            return Err(ConnectionError::InvalidState { state: self.state, operation: "receive" });
        }

        let mut actions = Vec::new();
        while !matches!(self.state, ConnectionState::Closed | ConnectionState::ClosingRemote) {
            match self.codec.decode(buf) {
                Ok(Some(frame)) => match self.handle_frame(frame, now) {
                    Ok(more) => {
                        let delivered = more.iter().any(|a| matches!(a, ConnectionAction::Deliver(_)));
                        actions.extend(more);
                        if delivered {
                            break;
                        }
                    },
                    Err(err) => {
                        actions.extend(self.fail(err));
                        break;
                    },
                },
                Ok(None) => break,
                Err(err) => {
                    actions.extend(self.fail(err));
                    break;
                },
            }
        }

        if matches!(self.state, ConnectionState::Closed | ConnectionState::ClosingRemote) {
            buf.clear();
        }
        Ok(actions)
    }

    /// Handle one decoded frame.
    ///
    /// # Errors
    ///
    /// Returns the protocol violation the frame carries (bad continuation
    /// sequencing, invalid UTF-8, oversized message, malformed Close
    /// payload). The caller should pass it to [`Connection::fail`].
    pub fn handle_frame(
        &mut self,
        frame: Frame,
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ProtocolError> {
        self.last_activity = now;

        match (self.state, frame.opcode) {
            (ConnectionState::Open, Opcode::Ping) => {
                debug!(len = frame.payload.len(), "ping");
                Ok(vec![ConnectionAction::SendFrame(Frame::pong(frame.payload))])
            },
            (ConnectionState::Open, Opcode::Pong) => Ok(vec![]),
            (ConnectionState::Open | ConnectionState::ClosingLocal, Opcode::Close) => {
                let info = CloseInfo::parse(&frame.payload)?;
                self.receive_close(info)
            },
            (ConnectionState::Open, _) => {
                Ok(self.reassembler.push(frame)?.map(ConnectionAction::Deliver).into_iter().collect())
            },
            (state, opcode) => {
                debug!(?state, ?opcode, "discarding frame");
                Ok(vec![])
            },
        }
    }

    fn receive_close(
        &mut self,
        info: Option<CloseInfo>,
    ) -> Result<Vec<ConnectionAction>, ProtocolError> {
        debug!(code = ?info.as_ref().map(CloseInfo::code), "peer close");

        match self.close.receive(info) {
            CloseStep::Reply(frame) => {
                self.state = ConnectionState::ClosingRemote;
                self.reassembler.reset();
                Ok(vec![
                    ConnectionAction::SendFrame(frame),
                    ConnectionAction::Close { reason: "peer closed".to_string() },
                ])
            },
            CloseStep::Complete => {
                self.state = ConnectionState::Closed;
                Ok(vec![ConnectionAction::Close { reason: "close acknowledged".to_string() }])
            },
            CloseStep::Ignored => Ok(vec![]),
        }
    }

    /// Tear the connection down after a protocol violation.
    ///
    /// Sends a Close frame with the matching status code if none was sent
    /// yet, then closes regardless of the peer.
    pub fn fail(&mut self, err: ProtocolError) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Closed {
            return vec![];
        }
        let code = err.close_code();
        warn!(%err, %code, "protocol error");

        let info = CloseInfo::new(code, err.to_string()).unwrap_or_else(|_| CloseInfo::code_only(code));
        let mut actions = Vec::with_capacity(2);
        if let Some(frame) = self.close.abort(info) {
            actions.push(ConnectionAction::SendFrame(frame));
        }
        actions.push(ConnectionAction::Close { reason: err.to_string() });

        self.reassembler.reset();
        self.failure = Some(err);
        self.state = ConnectionState::Closed;
        actions
    }

    /// Send an application message.
    ///
    /// Fragmented according to `fragment_threshold`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless Open.
    pub fn send(&mut self, message: Message) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::InvalidState { state: self.state, operation: "send" });
        }
        let max_fragment = self.config.fragment_threshold.unwrap_or(0);
        Ok(message.into_frames(max_fragment).into_iter().map(ConnectionAction::SendFrame).collect())
    }

    /// Send a Ping.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless Open
    /// - `Protocol` if the payload exceeds 125 bytes
    pub fn ping(&mut self, payload: Bytes) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::InvalidState { state: self.state, operation: "ping" });
        }
        if payload.len() as u64 > MAX_CONTROL_PAYLOAD {
            return Err(ProtocolError::ControlFrameTooLarge(payload.len() as u64).into());
        }
        Ok(vec![ConnectionAction::SendFrame(Frame::ping(payload))])
    }

    /// Start the closing handshake.
    ///
    /// Idempotent once closing has begun.
    ///
    /// # Errors
    ///
    /// - `InvalidState` before the handshake completed
    /// - `Protocol` if the code may not be sent on the wire
    pub fn close(
        &mut self,
        info: CloseInfo,
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        match self.state {
            ConnectionState::Connecting => {
                Err(ConnectionError::InvalidState { state: self.state, operation: "close" })
            },
            ConnectionState::Open => {
                if !info.code().is_valid_on_wire() {
                    return Err(ProtocolError::InvalidCloseCode(info.code().get()).into());
                }
                debug!(%info, "initiating close");
                self.reassembler.reset();
                self.state = ConnectionState::ClosingLocal;
                Ok(self.close.initiate(info, now).map(ConnectionAction::SendFrame).into_iter().collect())
            },
            ConnectionState::ClosingLocal | ConnectionState::ClosingRemote | ConnectionState::Closed => {
                Ok(vec![])
            },
        }
    }

    /// Drive timers: heartbeat pings, idle timeout and the close timeout.
    pub fn tick(&mut self, now: Instant) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::ClosingLocal => {
                if self.close.poll_timeout(now) {
                    warn!(timeout = ?self.config.close_timeout, "peer never acknowledged close");
                    self.state = ConnectionState::Closed;
                    return vec![ConnectionAction::Close {
                        reason: "close handshake timed out".to_string(),
                    }];
                }
                vec![]
            },
            ConnectionState::Open => {
                if let Some(idle) = self.config.idle_timeout {
                    if now.duration_since(self.last_activity) >= idle {
                        warn!(?idle, "idle timeout");
                        let info = CloseInfo::code_only(CloseCode::GOING_AWAY);
                        self.reassembler.reset();
                        self.state = ConnectionState::ClosingLocal;
                        return self
                            .close
                            .initiate(info, now)
                            .map(ConnectionAction::SendFrame)
                            .into_iter()
                            .collect();
                    }
                }

                if let Some(interval) = self.config.heartbeat_interval {
                    if now.duration_since(self.last_heartbeat) >= interval {
                        self.last_heartbeat = now;
                        return vec![ConnectionAction::SendFrame(Frame::ping(Bytes::new()))];
                    }
                }
                vec![]
            },
            _ => vec![],
        }
    }

    /// Next instant at which [`Connection::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            ConnectionState::ClosingLocal => self.close.deadline(),
            ConnectionState::Open => {
                let idle = self.config.idle_timeout.map(|d| self.last_activity + d);
                let heartbeat = self.config.heartbeat_interval.map(|d| self.last_heartbeat + d);
                match (idle, heartbeat) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            },
            _ => None,
        }
    }

    /// Mark the transport released.
    ///
    /// Call after the transport is shut down, whatever the reason (close
    /// handshake done, timeout, protocol error, I/O failure, EOF). The
    /// connection is Closed afterwards. Returns `true` the first time only.
    pub fn finish(&mut self) -> bool {
        self.state = ConnectionState::Closed;
        self.reassembler.reset();
        self.close.release()
    }
}
