//! Peers and world state for scenario execution.

use std::{
    collections::{HashMap, VecDeque},
    time::Instant,
};

use bytes::{Bytes, BytesMut};
use echoframe_core::{
    ClientHandshake, Connection, ConnectionAction, ConnectionConfig, EchoHandler, Environment,
    HttpResponse, MessageHandler, Reassembler, handshake::find_head_end,
};
use echoframe_proto::{CloseCode, CloseInfo, Frame, FrameCodec, Message, Opcode};
use tracing::trace;

use crate::SimEnv;

/// One scripted action of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send a message as a single frame
    Send(Message),
    /// Send a message split into fragments of at most `max_fragment` bytes
    Fragmented {
        /// Message to send
        message: Message,
        /// Largest fragment payload
        max_fragment: usize,
    },
    /// Send arbitrary frames, masked as a client must
    Frames(Vec<Frame>),
    /// Send a Ping
    Ping(Bytes),
    /// Send an unsolicited Pong
    Pong(Bytes),
    /// Send a Close frame (`None` for an empty payload)
    Close(Option<CloseInfo>),
    /// Write raw bytes, bypassing the codec
    Raw(Bytes),
    /// Make the server send a message
    ServerSend(Message),
    /// Make the server send a Ping
    ServerPing(Bytes),
    /// Make the server start the closing handshake
    ServerClose(CloseInfo),
}

/// A scripted client wired to its own server-side [`Connection`].
///
/// The server side answers every message with [`EchoHandler`] and follows
/// each engine action the way the session driver does.
pub struct Peer {
    conn: Connection,
    handler: EchoHandler,
    env: SimEnv,
    client_codec: FrameCodec,
    server_codec: FrameCodec,
    reassembler: Reassembler,
    to_server: BytesMut,
    from_server: BytesMut,
    sent: Vec<Message>,
    echoed: Vec<Message>,
    pings: Vec<Bytes>,
    pongs: Vec<Bytes>,
    server_close: Option<Option<CloseInfo>>,
    delivered: usize,
    close_actions: usize,
    released: bool,
    rejected_commands: usize,
    frames_sent: usize,
    frames_received: usize,
}

impl Peer {
    /// Open a connection: run the opening handshake and validate the 101
    /// response.
    pub fn connect(config: ConnectionConfig, env: SimEnv, now: Instant) -> Result<Self, String> {
        let path = config.upgrade_path.clone().unwrap_or_else(|| "/".to_string());
        let handshake = ClientHandshake::new("localhost", path, env.random_nonce());

        let mut peer = Self {
            conn: Connection::new(config, now),
            handler: EchoHandler,
            env,
            client_codec: FrameCodec::client(),
            server_codec: FrameCodec::server(),
            reassembler: Reassembler::new(u64::MAX),
            to_server: BytesMut::new(),
            from_server: BytesMut::new(),
            sent: Vec::new(),
            echoed: Vec::new(),
            pings: Vec::new(),
            pongs: Vec::new(),
            server_close: None,
            delivered: 0,
            close_actions: 0,
            released: false,
            rejected_commands: 0,
            frames_sent: 0,
            frames_received: 0,
        };

        let actions = peer
            .conn
            .handshake(&handshake.request_bytes(), now)
            .map_err(|e| format!("handshake rejected: {e}"))?;
        peer.execute(actions);

        let end = find_head_end(&peer.from_server).ok_or("incomplete handshake response")?;
        let head = peer.from_server.split_to(end);
        let response = HttpResponse::parse(&head).map_err(|e| e.to_string())?;
        handshake.validate(&response).map_err(|e| e.to_string())?;
        Ok(peer)
    }

    /// Perform one step. Steps after the transport was released are no-ops.
    pub fn apply(&mut self, step: Step, now: Instant) -> Result<(), String> {
        if self.released {
            trace!(?step, "transport released, step dropped");
            return Ok(());
        }

        match step {
            Step::Send(message) => {
                self.sent.push(message.clone());
                self.write(&message.into_frames(0));
            },
            Step::Fragmented { message, max_fragment } => {
                self.sent.push(message.clone());
                self.write(&message.into_frames(max_fragment));
            },
            Step::Frames(frames) => self.write(&frames),
            Step::Ping(payload) => self.write(&[Frame::ping(payload)]),
            Step::Pong(payload) => self.write(&[Frame::pong(payload)]),
            Step::Close(info) => self.write(&[Frame::close(info.as_ref())]),
            Step::Raw(bytes) => self.to_server.extend_from_slice(&bytes),
            Step::ServerSend(message) => {
                let result = self.conn.send(message);
                return self.command(result);
            },
            Step::ServerPing(payload) => {
                let result = self.conn.ping(payload);
                return self.command(result);
            },
            Step::ServerClose(info) => {
                let result = self.conn.close(info, now);
                return self.command(result);
            },
        }
        self.pump(now)
    }

    /// Move the clock from `from` to `to`, firing every timer in between.
    pub fn advance(&mut self, from: Instant, to: Instant) -> Result<(), String> {
        let mut last = None;
        while let Some(deadline) = self.conn.next_deadline().filter(|d| *d <= to) {
            if last == Some(deadline) {
                break;
            }
            last = Some(deadline);
            let actions = self.conn.tick(deadline.max(from));
            self.execute(actions);
            self.collect()?;
        }
        Ok(())
    }

    fn write(&mut self, frames: &[Frame]) {
        for frame in frames {
            self.client_codec.encode(frame, self.env.random_mask(), &mut self.to_server);
            self.frames_sent += 1;
        }
    }

    fn command(
        &mut self,
        result: Result<Vec<ConnectionAction>, echoframe_core::ConnectionError>,
    ) -> Result<(), String> {
        match result {
            Ok(actions) => self.execute(actions),
            Err(err) => {
                trace!(%err, "command rejected");
                self.rejected_commands += 1;
            },
        }
        self.collect()
    }

    fn pump(&mut self, now: Instant) -> Result<(), String> {
        loop {
            let actions = self.conn.receive(&mut self.to_server, now).map_err(|e| e.to_string())?;
            let delivered = actions.iter().any(|a| matches!(a, ConnectionAction::Deliver(_)));
            self.execute(actions);
            if !delivered || self.released {
                break;
            }
        }
        self.collect()
    }

    fn execute(&mut self, actions: Vec<ConnectionAction>) {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            match action {
                ConnectionAction::SendHandshake(bytes) => self.from_server.extend_from_slice(&bytes),
                ConnectionAction::SendFrame(frame) => {
                    self.server_codec.encode(&frame, [0; 4], &mut self.from_server);
                },
                ConnectionAction::Deliver(message) => {
                    self.delivered += 1;
                    if let Some(reply) = self.handler.on_message(message) {
                        if let Ok(frames) = self.conn.send(reply) {
                            for frame in frames.into_iter().rev() {
                                queue.push_front(frame);
                            }
                        }
                    }
                },
                ConnectionAction::Close { reason } => {
                    trace!(%reason, "transport closed");
                    self.close_actions += 1;
                    if self.conn.finish() {
                        self.released = true;
                    }
                },
            }
        }
    }

    fn collect(&mut self) -> Result<(), String> {
        while let Some(frame) = self
            .client_codec
            .decode(&mut self.from_server)
            .map_err(|e| format!("server sent an invalid frame: {e}"))?
        {
            self.frames_received += 1;
            match frame.opcode {
                Opcode::Ping => self.pings.push(frame.payload),
                Opcode::Pong => self.pongs.push(frame.payload),
                Opcode::Close => {
                    let info = CloseInfo::parse(&frame.payload)
                        .map_err(|e| format!("server sent an invalid close frame: {e}"))?;
                    self.server_close = Some(info);
                },
                _ => {
                    let message = self
                        .reassembler
                        .push(frame)
                        .map_err(|e| format!("server sent an invalid message: {e}"))?;
                    self.echoed.extend(message);
                },
            }
        }
        Ok(())
    }

    /// Server-side connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Messages this peer sent with `Send` or `Fragmented`.
    pub fn sent(&self) -> &[Message] {
        &self.sent
    }

    /// Complete messages the server sent back.
    pub fn echoed(&self) -> &[Message] {
        &self.echoed
    }

    /// Ping payloads the server sent.
    pub fn pings(&self) -> &[Bytes] {
        &self.pings
    }

    /// Pong payloads the server sent.
    pub fn pongs(&self) -> &[Bytes] {
        &self.pongs
    }

    /// Close frame the server sent: `Some(None)` for an empty one.
    pub fn server_close(&self) -> Option<Option<&CloseInfo>> {
        self.server_close.as_ref().map(Option::as_ref)
    }

    /// Status code of the server's Close frame.
    pub fn close_code(&self) -> Option<CloseCode> {
        self.server_close.as_ref().and_then(|info| info.as_ref().map(CloseInfo::code))
    }

    /// Messages the server delivered to its handler.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Times the engine asked for the transport to be closed.
    pub fn close_actions(&self) -> usize {
        self.close_actions
    }

    /// Check if the transport was torn down.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Server commands the engine refused.
    pub fn rejected_commands(&self) -> usize {
        self.rejected_commands
    }

    /// Frames this peer wrote.
    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    /// Frames this peer read.
    pub fn frames_received(&self) -> usize {
        self.frames_received
    }
}

/// World state containing all peers.
#[derive(Default)]
pub struct World {
    peers: HashMap<String, Peer>,
    order: Vec<String>,
}

impl World {
    /// Create an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connected peer.
    pub fn add_peer(&mut self, name: String, peer: Peer) {
        if self.peers.insert(name.clone(), peer).is_none() {
            self.order.push(name);
        }
    }

    /// Get a peer by name.
    pub fn peer(&self, name: &str) -> Option<&Peer> {
        self.peers.get(name)
    }

    /// Get a mutable peer by name.
    pub fn peer_mut(&mut self, name: &str) -> Option<&mut Peer> {
        self.peers.get_mut(name)
    }

    /// Peer names in the order they were added.
    pub fn peer_names(&self) -> &[String] {
        &self.order
    }

    /// All peers with their names, in the order they were added.
    pub fn peers(&self) -> impl Iterator<Item = (&str, &Peer)> {
        self.order.iter().filter_map(|name| self.peers.get(name).map(|p| (name.as_str(), p)))
    }

    /// All peers, mutably.
    pub fn peers_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (Peer, Instant) {
        let now = Instant::now();
        (Peer::connect(ConnectionConfig::default(), SimEnv::new(), now).unwrap(), now)
    }

    #[test]
    fn connect_opens_connection() {
        let (peer, _) = open();
        assert!(peer.connection().is_open());
        assert_eq!(peer.frames_received(), 0);
    }

    #[test]
    fn connect_uses_configured_path() {
        let config = ConnectionConfig { upgrade_path: Some("/ws".into()), ..Default::default() };
        let mut peer = Peer::connect(config, SimEnv::new(), Instant::now()).unwrap();
        peer.apply(Step::Send(Message::text("hi")), Instant::now()).unwrap();
        assert_eq!(peer.echoed(), &[Message::text("hi")]);
    }

    #[test]
    fn echo_and_close() {
        let (mut peer, now) = open();
        peer.apply(Step::Send(Message::text("hi")), now).unwrap();
        peer.apply(Step::Close(Some(CloseInfo::normal())), now).unwrap();

        assert_eq!(peer.echoed(), &[Message::text("hi")]);
        assert_eq!(peer.close_code(), Some(CloseCode::NORMAL));
        assert!(peer.is_released());
        assert_eq!(peer.close_actions(), 1);
    }

    #[test]
    fn steps_after_release_are_dropped() {
        let (mut peer, now) = open();
        peer.apply(Step::Close(None), now).unwrap();
        peer.apply(Step::Send(Message::text("late")), now).unwrap();
        assert!(peer.sent().is_empty());
        assert!(peer.echoed().is_empty());
    }
}
