//! Turmoil TCP transport.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use echoframe_core::Transport;
use turmoil::net::{TcpListener, TcpStream};

/// Listener on the simulated network.
pub struct SimTransport {
    listener: TcpListener,
}

impl SimTransport {
    /// Bind a listener on the current simulated host, e.g. `"0.0.0.0:80"`.
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Connect to a simulated host, e.g. `"server:80"`.
    pub async fn connect_to(addr: &str) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
