//! Per-connection session driver.
//!
//! A session owns one stream and one [`Connection`]. It is the only task
//! that writes to the stream: pong replies, handler replies, host commands
//! and close frames are all encoded into one buffer in the order the engine
//! produced them and flushed before the next wake-up, so frames never
//! interleave on the wire.
//!
//! The session wakes on four events: inbound bytes, a host command, server
//! shutdown, or the engine's next timer deadline. Every wait is
//! cancellable, so shutdown or a close timeout never leaves a read pending.
//! Writes are cancellable too: a peer that stops reading still sees timers
//! and shutdown fire, and once closing starts the remaining output gets at
//! most `close_timeout` before the transport is dropped.

use std::{collections::VecDeque, io, net::SocketAddr, time::Instant};

use bytes::{Buf, Bytes, BytesMut};
use echoframe_core::{
    Connection, ConnectionAction, ConnectionError, Environment, HandshakeError, Initiator,
    MessageHandler, handshake::find_head_end,
};
use echoframe_proto::{CloseCode, CloseInfo, FrameCodec, Message};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, watch},
};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;

/// Host request for a session, sent through a
/// [`ConnectionHandle`](crate::ConnectionHandle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a message
    Send(Message),
    /// Send a Ping
    Ping(Bytes),
    /// Start the closing handshake
    Close(CloseInfo),
}

/// What happened on a finished session.
#[derive(Debug)]
pub struct SessionSummary {
    /// Remote address
    pub peer: SocketAddr,
    /// Side that sent the first Close frame
    pub initiator: Option<Initiator>,
    /// Close info we sent
    pub local_close: Option<CloseInfo>,
    /// Close info the peer sent
    pub remote_close: Option<CloseInfo>,
    /// Both Close frames were exchanged
    pub clean: bool,
    /// Complete messages received
    pub messages_received: u64,
    /// Messages sent (handler replies and host sends)
    pub messages_sent: u64,
    /// Error that ended the session, if any
    pub error: Option<ConnectionError>,
}

enum Wake {
    Read(io::Result<usize>),
    Command(Option<Command>),
    Shutdown,
    Timer,
}

enum WriteWake {
    Written(io::Result<usize>),
    Shutdown,
    Timer,
}

/// Driver for one accepted connection.
pub struct Session<S, E, H> {
    stream: S,
    peer: SocketAddr,
    env: E,
    handler: H,
    config: SessionConfig,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
    codec: FrameCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    shutting_down: bool,
    messages_received: u64,
    messages_sent: u64,
}

impl<S, E, H> Session<S, E, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    E: Environment,
    H: MessageHandler,
{
    /// Create a session for an accepted stream.
    ///
    /// `shutdown` flipping to `true` makes the session close with 1001.
    pub fn new(
        stream: S,
        peer: SocketAddr,
        env: E,
        handler: H,
        config: SessionConfig,
        commands: mpsc::Receiver<Command>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream,
            peer,
            env,
            handler,
            config,
            commands,
            shutdown,
            codec: FrameCodec::server(),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            shutting_down: false,
            messages_received: 0,
            messages_sent: 0,
        }
    }

    /// Run the session to completion.
    ///
    /// # Errors
    ///
    /// Fails only before the connection opened: a rejected or timed-out
    /// handshake, or a transport failure while reading it. Once Open, every
    /// outcome is reported in the [`SessionSummary`].
    pub async fn run(mut self) -> Result<SessionSummary, ConnectionError> {
        let mut conn = Connection::new(self.config.connection.clone(), self.env.now());
        self.handshake(&mut conn).await?;
        info!(peer = %self.peer, "connection open");

        let error = self.serve(&mut conn).await.err();
        if let Some(err) = &error {
            warn!(%err, "session ended with error");
        }

        if conn.finish() {
            self.release().await;
        }
        self.handler.on_close(conn.remote_close());

        let summary = SessionSummary {
            peer: self.peer,
            initiator: conn.close_initiator(),
            local_close: conn.local_close().cloned(),
            remote_close: conn.remote_close().cloned(),
            clean: conn.is_clean(),
            messages_received: self.messages_received,
            messages_sent: self.messages_sent,
            error,
        };
        info!(
            peer = %summary.peer,
            clean = summary.clean,
            received = summary.messages_received,
            sent = summary.messages_sent,
            "connection closed"
        );
        Ok(summary)
    }

    async fn handshake(&mut self, conn: &mut Connection) -> Result<(), ConnectionError> {
        let max = self.config.max_handshake_bytes;
        let head_len = tokio::select! {
            head = read_head(&mut self.stream, &mut self.read_buf, max) => head,
            () = self.env.sleep(self.config.handshake_timeout) => {
                warn!(peer = %self.peer, "handshake timed out");
                conn.finish();
                return Err(ConnectionError::Timeout { operation: "handshake" });
            },
            () = stopped(&mut self.shutdown) => {
                conn.finish();
                let aborted = io::Error::new(io::ErrorKind::ConnectionAborted, "server shutting down");
                return Err(aborted.into());
            },
        };

        let result = head_len.and_then(|len| {
            let head = self.read_buf.split_to(len);
            conn.handshake(&head, self.env.now())
        });

        match result {
            Ok(actions) => {
                self.execute(conn, actions).await?;
                Ok(())
            },
            Err(ConnectionError::Handshake(err)) => {
                warn!(peer = %self.peer, %err, status = err.status(), "handshake rejected");
                let rejection = err.rejection();
                let written = tokio::select! {
                    written = self.stream.write_all(&rejection) => written,
                    () = self.env.sleep(self.config.handshake_timeout) => {
                        Err(io::ErrorKind::TimedOut.into())
                    },
                };
                self.release().await;
                conn.finish();
                written?;
                Err(err.into())
            },
            Err(err) => {
                conn.finish();
                Err(err)
            },
        }
    }

    async fn serve(&mut self, conn: &mut Connection) -> Result<(), ConnectionError> {
        let mut commands_open = true;

        // Bytes that arrived right behind the request head.
        if self.drain(conn).await? {
            return Ok(());
        }

        loop {
            let deadline = conn.next_deadline();
            let env = self.env.clone();
            let timer = async move {
                match deadline {
                    Some(at) => env.sleep(at.saturating_duration_since(env.now())).await,
                    None => std::future::pending().await,
                }
            };

            let wake = tokio::select! {
                read = self.stream.read_buf(&mut self.read_buf) => Wake::Read(read),
                command = self.commands.recv(), if commands_open => Wake::Command(command),
                () = stopped(&mut self.shutdown), if !self.shutting_down => Wake::Shutdown,
                () = timer => Wake::Timer,
            };

            let now = self.env.now();
            let actions = match wake {
                Wake::Read(Ok(0)) => {
                    debug!("peer closed the stream");
                    return Ok(());
                },
                Wake::Read(Ok(_)) => {
                    if self.drain(conn).await? {
                        return Ok(());
                    }
                    continue;
                },
                Wake::Read(Err(err)) => return Err(err.into()),
                Wake::Command(Some(command)) => self.command(conn, command, now),
                Wake::Command(None) => {
                    commands_open = false;
                    continue;
                },
                Wake::Shutdown => {
                    self.shutting_down = true;
                    info!("server shutting down, closing connection");
                    conn.close(CloseInfo::code_only(CloseCode::GOING_AWAY), now).unwrap_or_default()
                },
                Wake::Timer => conn.tick(now),
            };

            if self.execute(conn, actions).await? {
                return Ok(());
            }
        }
    }

    /// Feed buffered input to the engine until it stops producing
    /// messages. Returns `true` once the transport was shut down.
    async fn drain(&mut self, conn: &mut Connection) -> Result<bool, ConnectionError> {
        loop {
            let actions = conn.receive(&mut self.read_buf, self.env.now())?;
            let delivered = actions.iter().any(|a| matches!(a, ConnectionAction::Deliver(_)));
            if self.execute(conn, actions).await? {
                return Ok(true);
            }
            if !delivered {
                return Ok(false);
            }
        }
    }

    fn command(
        &mut self,
        conn: &mut Connection,
        command: Command,
        now: Instant,
    ) -> Vec<ConnectionAction> {
        let result = match command {
            Command::Send(message) => conn.send(message).inspect(|_| self.messages_sent += 1),
            Command::Ping(payload) => conn.ping(payload),
            Command::Close(info) => conn.close(info, now),
        };
        result.unwrap_or_else(|err| {
            debug!(%err, "dropping command");
            Vec::new()
        })
    }

    /// Execute engine actions in order, then flush. Returns `true` if the
    /// transport was shut down.
    async fn execute(
        &mut self,
        conn: &mut Connection,
        actions: Vec<ConnectionAction>,
    ) -> Result<bool, ConnectionError> {
        let mut queue = VecDeque::from(actions);
        let mut close = None;

        while let Some(action) = queue.pop_front() {
            match action {
                ConnectionAction::SendHandshake(bytes) => self.write_buf.extend_from_slice(&bytes),
                ConnectionAction::SendFrame(frame) => {
                    debug!(opcode = ?frame.opcode, len = frame.payload.len(), fin = frame.fin, "send");
                    self.codec.encode(&frame, [0; 4], &mut self.write_buf);
                },
                ConnectionAction::Deliver(message) => {
                    self.messages_received += 1;
                    debug!(kind = ?message.kind(), len = message.len(), "message");
                    if let Some(reply) = self.handler.on_message(message) {
                        match conn.send(reply) {
                            Ok(frames) => {
                                self.messages_sent += 1;
                                for frame in frames.into_iter().rev() {
                                    queue.push_front(frame);
                                }
                            },
                            Err(err) => debug!(%err, "reply dropped"),
                        }
                    }
                },
                ConnectionAction::Close { reason } => close = Some(reason),
            }
        }

        if let Some(reason) = self.write_out(conn).await? {
            close = Some(reason);
        }

        match close {
            Some(reason) => {
                debug!(%reason, "shutting transport down");
                self.release().await;
                conn.finish();
                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Write and flush everything encoded so far.
    ///
    /// Shutdown and engine timers are served while the write is pending;
    /// frames they produce are queued behind the pending bytes. Once the
    /// connection is no longer Open the rest of the output must go out
    /// within `close_timeout`. Returns a reason if the engine gave up on the
    /// transport meanwhile.
    async fn write_out(&mut self, conn: &mut Connection) -> Result<Option<String>, ConnectionError> {
        let mut grace = None;

        while !self.write_buf.is_empty() {
            let now = self.env.now();
            if grace.is_none() && !conn.is_open() {
                grace = Some(now + conn.config().close_timeout);
            }
            let deadline = match (grace, conn.next_deadline()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let env = self.env.clone();
            let timer = async move {
                match deadline {
                    Some(at) => env.sleep(at.saturating_duration_since(env.now())).await,
                    None => std::future::pending().await,
                }
            };

            // `write` is cancel safe: a losing branch wrote nothing.
            let wake = tokio::select! {
                written = self.stream.write(&self.write_buf) => WriteWake::Written(written),
                () = stopped(&mut self.shutdown), if !self.shutting_down => WriteWake::Shutdown,
                () = timer => WriteWake::Timer,
            };

            let now = self.env.now();
            let actions = match wake {
                WriteWake::Written(Ok(0)) => {
                    return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                },
                WriteWake::Written(Ok(n)) => {
                    self.write_buf.advance(n);
                    continue;
                },
                WriteWake::Written(Err(err)) => return Err(err.into()),
                WriteWake::Shutdown => {
                    self.shutting_down = true;
                    info!("server shutting down while peer is not reading");
                    conn.close(CloseInfo::code_only(CloseCode::GOING_AWAY), now)
                        .unwrap_or_default()
                },
                WriteWake::Timer if grace.is_some_and(|at| now >= at) => {
                    warn!("peer stopped reading, dropping connection");
                    return Err(ConnectionError::Timeout { operation: "write" });
                },
                WriteWake::Timer => conn.tick(now),
            };

            for action in actions {
                match action {
                    ConnectionAction::SendFrame(frame) => {
                        self.codec.encode(&frame, [0; 4], &mut self.write_buf);
                    },
                    ConnectionAction::Close { reason } => return Ok(Some(reason)),
                    ConnectionAction::SendHandshake(_) | ConnectionAction::Deliver(_) => {},
                }
            }
        }

        let flushed = tokio::select! {
            flushed = self.stream.flush() => flushed,
            () = self.env.sleep(conn.config().close_timeout), if !conn.is_open() => {
                return Err(ConnectionError::Timeout { operation: "flush" });
            },
        };
        flushed?;
        Ok(None)
    }

    /// Shut the write half down, giving up after `close_timeout`.
    async fn release(&mut self) {
        let grace = self.config.connection.close_timeout;
        tokio::select! {
            _ = self.stream.shutdown() => {},
            () = self.env.sleep(grace) => debug!("transport shutdown timed out"),
        }
    }
}

/// Read until the request head is complete. Returns the head length; the
/// head and anything after it stay in `buf`.
async fn read_head<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    max: usize,
) -> Result<usize, ConnectionError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(end) = find_head_end(buf) {
            if end > max {
                return Err(HandshakeError::HeadTooLarge(end).into());
            }
            return Ok(end);
        }
        if buf.len() > max {
            return Err(HandshakeError::HeadTooLarge(buf.len()).into());
        }
        if stream.read_buf(buf).await? == 0 {
            let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended during handshake");
            return Err(eof.into());
        }
    }
}

/// Resolve once shutdown was requested. Never resolves if the sender is
/// gone.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use echoframe_core::{ClientHandshake, ConnectionConfig, EchoHandler, HttpResponse, SystemEnv};
    use echoframe_proto::Frame;
    use tokio::{
        io::{DuplexStream, duplex},
        task::JoinHandle,
    };

    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn session(
        stream: DuplexStream,
        config: SessionConfig,
    ) -> (Session<DuplexStream, SystemEnv, EchoHandler>, watch::Sender<bool>) {
        let (_commands_tx, commands) = mpsc::channel(1);
        let (stop, shutdown) = watch::channel(false);
        let session =
            Session::new(stream, peer(), SystemEnv::new(), EchoHandler, config, commands, shutdown);
        (session, stop)
    }

    async fn read_response_head(stream: &mut DuplexStream, buf: &mut BytesMut) -> HttpResponse {
        let len = loop {
            if let Some(end) = find_head_end(buf) {
                break end;
            }
            assert!(stream.read_buf(buf).await.unwrap() > 0, "stream ended early");
        };
        HttpResponse::parse(&buf.split_to(len)).unwrap()
    }

    /// Open a session, then flood it with frames from a peer that never
    /// reads the echoes, so the session ends up stuck writing.
    async fn flooded_session(
        config: SessionConfig,
    ) -> (JoinHandle<Result<SessionSummary, ConnectionError>>, watch::Sender<bool>) {
        let (server_io, mut client_io) = duplex(1024);
        let (session, stop) = session(server_io, config);
        let task = tokio::spawn(session.run());

        let handshake = ClientHandshake::new("localhost", "/", [7u8; 16]);
        client_io.write_all(&handshake.request_bytes()).await.unwrap();
        let mut buf = BytesMut::new();
        read_response_head(&mut client_io, &mut buf).await;

        tokio::spawn(async move {
            let codec = FrameCodec::client();
            for _ in 0..64 {
                let mut frame = BytesMut::new();
                codec.encode(&Frame::binary(vec![0xAB; 4096]), [1, 2, 3, 4], &mut frame);
                if client_io.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        (task, stop)
    }

    fn short_close_timeout() -> ConnectionConfig {
        ConnectionConfig { close_timeout: Duration::from_secs(1), ..Default::default() }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_peer_that_never_reads() {
        let config = SessionConfig { connection: short_close_timeout(), ..Default::default() };
        let (task, stop) = flooded_session(config).await;
        assert!(!task.is_finished());

        stop.send(true).unwrap();
        let summary = tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("session outlived shutdown")
            .unwrap()
            .unwrap();

        assert!(!summary.clean);
        assert_eq!(summary.initiator, Some(Initiator::Local));
        assert_eq!(summary.local_close, Some(CloseInfo::code_only(CloseCode::GOING_AWAY)));
        assert!(summary.messages_received >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_releases_peer_that_never_reads() {
        let connection =
            ConnectionConfig { idle_timeout: Some(Duration::from_secs(2)), ..short_close_timeout() };
        let config = SessionConfig { connection, ..Default::default() };
        let (task, _stop) = flooded_session(config).await;

        let summary = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("session outlived idle and close timeouts")
            .unwrap()
            .unwrap();

        assert!(!summary.clean);
        assert_eq!(summary.local_close, Some(CloseInfo::code_only(CloseCode::GOING_AWAY)));
    }

    #[tokio::test]
    async fn oversized_head_rejected_with_431() {
        let (server_io, mut client_io) = duplex(64 * 1024);
        let config = SessionConfig { max_handshake_bytes: 1024, ..Default::default() };
        let (session, _stop) = session(server_io, config);
        let task = tokio::spawn(session.run());

        let mut request = b"GET / HTTP/1.1\r\nHost: localhost\r\n".to_vec();
        request.extend_from_slice(format!("X-Filler: {}\r\n", "a".repeat(2048)).as_bytes());
        client_io.write_all(&request).await.unwrap();

        let mut response = String::new();
        client_io.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 431 "), "{response}");

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(ConnectionError::Handshake(HandshakeError::HeadTooLarge(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (server_io, _client_io) = duplex(1024);
        let config = SessionConfig { handshake_timeout: Duration::from_secs(3), ..Default::default() };
        let (session, _stop) = session(server_io, config);

        let result = session.run().await;
        assert!(matches!(result, Err(ConnectionError::Timeout { operation: "handshake" })));
    }

    #[tokio::test]
    async fn shutdown_during_handshake_aborts() {
        let (server_io, _client_io) = duplex(1024);
        let (session, stop) = session(server_io, SessionConfig::default());
        let task = tokio::spawn(session.run());

        stop.send(true).unwrap();
        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(ConnectionError::Transport(err)) if err.kind() == io::ErrorKind::ConnectionAborted
        ));
    }

    #[tokio::test]
    async fn frames_behind_head_are_echoed() {
        let (server_io, mut client_io) = duplex(64 * 1024);
        let (session, _stop) = session(server_io, SessionConfig::default());
        let task = tokio::spawn(session.run());

        let handshake = ClientHandshake::new("localhost", "/", [9u8; 16]);
        let codec = FrameCodec::client();
        let mut request = BytesMut::from(&handshake.request_bytes()[..]);
        codec.encode(&Frame::text("early"), [1, 2, 3, 4], &mut request);
        codec.encode(&Frame::close(Some(&CloseInfo::normal())), [5, 6, 7, 8], &mut request);
        client_io.write_all(&request).await.unwrap();

        let mut buf = BytesMut::new();
        let response = read_response_head(&mut client_io, &mut buf).await;
        assert_eq!(handshake.validate(&response), Ok(()));

        client_io.read_to_end(&mut Vec::new()).await.ok();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.messages_received, 1);
        assert_eq!(summary.messages_sent, 1);
        assert!(summary.clean);
        assert_eq!(summary.initiator, Some(Initiator::Remote));
        assert_eq!(summary.remote_close, Some(CloseInfo::normal()));
    }

    #[tokio::test]
    async fn echo_reply_precedes_close_reply() {
        let (server_io, mut client_io) = duplex(64 * 1024);
        let (session, _stop) = session(server_io, SessionConfig::default());
        let task = tokio::spawn(session.run());

        let handshake = ClientHandshake::new("localhost", "/", [3u8; 16]);
        let codec = FrameCodec::client();
        client_io.write_all(&handshake.request_bytes()).await.unwrap();
        let mut buf = BytesMut::new();
        read_response_head(&mut client_io, &mut buf).await;

        let mut frames = BytesMut::new();
        codec.encode(&Frame::binary(vec![1u8, 2, 3]), [9, 9, 9, 9], &mut frames);
        codec.encode(&Frame::close(None), [4, 4, 4, 4], &mut frames);
        client_io.write_all(&frames).await.unwrap();

        while client_io.read_buf(&mut buf).await.unwrap() > 0 {}

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, Frame::binary(vec![1u8, 2, 3]));
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second, Frame::close(Some(&CloseInfo::normal())));

        let summary = task.await.unwrap().unwrap();
        assert!(summary.clean);
        assert!(summary.error.is_none());
    }
}
