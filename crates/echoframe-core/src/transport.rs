//! Transport abstraction for accepting byte-stream connections.
//!
//! Production uses tokio TCP, tests use Turmoil (simulated TCP). The engine
//! only needs an ordered, reliable byte stream per connection; it never
//! manages TLS or routing.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Listener producing one byte stream per accepted peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Full-duplex byte stream to one peer.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept an incoming connection.
    ///
    /// Blocks until a peer connects and returns its stream and address.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Address the transport listens on.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}
