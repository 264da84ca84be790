//! Accept loop.
//!
//! One tokio task per accepted connection, each running its own
//! [`Session`]. Connections share nothing but the shutdown signal; a failure
//! on one never touches another.

use std::io;

use echoframe_core::{ConnectionError, EchoHandler, Environment, MessageHandler, Transport};
use tokio::{
    sync::watch,
    task::{JoinError, JoinSet},
};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    config::SessionConfig,
    handle::ConnectionHandle,
    session::{Session, SessionSummary, stopped},
};

/// Counters reported when the server stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Connections accepted
    pub accepted: u64,
    /// Sessions that ended with a completed close handshake
    pub clean_closes: u64,
    /// Sessions that failed before opening (rejected or timed-out handshake)
    pub rejected: u64,
}

impl ServerStats {
    fn record(&mut self, joined: Result<Result<SessionSummary, ConnectionError>, JoinError>) {
        match joined {
            Ok(Ok(summary)) => {
                if summary.clean {
                    self.clean_closes += 1;
                }
            },
            Ok(Err(err)) => {
                debug!(%err, "session never opened");
                self.rejected += 1;
            },
            Err(err) => warn!(%err, "session task failed"),
        }
    }
}

/// Handler factory for plain echo servers.
pub type EchoFactory = fn(&ConnectionHandle) -> EchoHandler;

/// WebSocket server over any [`Transport`].
///
/// `factory` builds the handler for each connection and receives that
/// connection's [`ConnectionHandle`], which the host may keep to push
/// messages or close the connection later.
pub struct Server<T, E, F> {
    transport: T,
    env: E,
    config: SessionConfig,
    factory: F,
}

impl<T, E> Server<T, E, EchoFactory>
where
    T: Transport,
    E: Environment,
{
    /// Server answering every message with itself.
    pub fn echo(transport: T, env: E, config: SessionConfig) -> Self {
        Self::new(transport, env, config, |_| EchoHandler)
    }
}

impl<T, E, F, H> Server<T, E, F>
where
    T: Transport,
    E: Environment,
    F: Fn(&ConnectionHandle) -> H + Send + 'static,
    H: MessageHandler,
{
    /// Create a server.
    pub fn new(transport: T, env: E, config: SessionConfig, factory: F) -> Self {
        Self { transport, env, config, factory }
    }

    /// Address the server listens on.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Accept connections until `shutdown` turns `true`.
    ///
    /// On shutdown every open session closes with 1001 (Going Away); this
    /// returns once all of them finished.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> io::Result<ServerStats> {
        let mut sessions = JoinSet::new();
        let mut stats = ServerStats::default();
        info!(addr = ?self.transport.local_addr().ok(), "listening");

        loop {
            tokio::select! {
                () = stopped(&mut shutdown) => break,
                accepted = self.transport.accept() => match accepted {
                    Ok((stream, peer)) => {
                        stats.accepted += 1;
                        let (handle, commands) = ConnectionHandle::channel(peer);
                        let handler = (self.factory)(&handle);
                        let session = Session::new(
                            stream,
                            peer,
                            self.env.clone(),
                            handler,
                            self.config.clone(),
                            commands,
                            shutdown.clone(),
                        );
                        sessions.spawn(session.run().instrument(info_span!("session", %peer)));
                    },
                    Err(err) => warn!(%err, "accept failed"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => stats.record(joined),
            }
        }

        info!(active = sessions.len(), "shutting down");
        while let Some(joined) = sessions.join_next().await {
            stats.record(joined);
        }
        Ok(stats)
    }
}
