//! Host-side handle to a running session.

use std::net::SocketAddr;

use bytes::Bytes;
use echoframe_core::{ConnectionError, ConnectionState};
use echoframe_proto::{CloseInfo, Message};
use tokio::sync::mpsc;

use crate::session::Command;

/// Commands queued per session before senders wait.
const COMMAND_CAPACITY: usize = 64;

/// Handle for sending to and closing one connection from outside its
/// session task.
///
/// Commands are queued and executed by the session, which stays the only
/// writer to the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    peer: SocketAddr,
    commands: mpsc::Sender<Command>,
}

impl ConnectionHandle {
    /// Create a handle and the command queue its session reads from.
    pub fn channel(peer: SocketAddr) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        (Self { peer, commands: tx }, rx)
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Check if the session has ended.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Queue a message.
    ///
    /// Messages queued once the connection started closing are dropped by
    /// the session.
    pub async fn send(&self, message: impl Into<Message>) -> Result<(), ConnectionError> {
        self.submit(Command::Send(message.into()), "send").await
    }

    /// Queue a Ping.
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<(), ConnectionError> {
        self.submit(Command::Ping(payload.into()), "ping").await
    }

    /// Start the closing handshake.
    pub async fn close(&self, info: CloseInfo) -> Result<(), ConnectionError> {
        self.submit(Command::Close(info), "close").await
    }

    async fn submit(&self, command: Command, operation: &'static str) -> Result<(), ConnectionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ConnectionError::InvalidState { state: ConnectionState::Closed, operation })
    }
}
