//! Server configuration.
//!
//! Command-line flags map onto [`ConnectionConfig`] plus the handshake
//! limits the session driver enforces before the engine takes over.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use echoframe_core::{ConnectionConfig, handshake::DEFAULT_MAX_HEAD_SIZE};

/// Default time allowed for the opening handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Command-line configuration for the echo server.
#[derive(Parser, Debug, Clone)]
#[command(name = "echoframe-server", version, about = "WebSocket echo server")]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Upgrade path; requests for any other path get 404
    #[arg(long, default_value = "/ws")]
    pub path: String,

    /// Largest accepted frame payload in bytes
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pub max_frame_size: u64,

    /// Largest accepted reassembled message in bytes
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pub max_message_size: u64,

    /// How long to wait for the client's Close after sending ours
    #[arg(long, default_value_t = 5_000)]
    pub close_timeout_ms: u64,

    /// Time allowed for the opening handshake
    #[arg(long, default_value_t = 10_000)]
    pub handshake_timeout_ms: u64,

    /// Largest accepted handshake request head in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_HEAD_SIZE)]
    pub max_handshake_bytes: usize,

    /// Send a Ping this often (disabled when absent)
    #[arg(long)]
    pub heartbeat_ms: Option<u64>,

    /// Close idle connections after this long (disabled when absent)
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,

    /// Fragment outgoing messages above this size (disabled when absent)
    #[arg(long)]
    pub fragment_threshold: Option<usize>,

    /// Log filter, overridden by `RUST_LOG`
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    /// Per-session settings derived from the flags.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connection: ConnectionConfig {
                max_frame_size: self.max_frame_size,
                max_message_size: self.max_message_size,
                close_timeout: Duration::from_millis(self.close_timeout_ms),
                fragment_threshold: self.fragment_threshold,
                heartbeat_interval: self.heartbeat_ms.map(Duration::from_millis),
                idle_timeout: self.idle_timeout_ms.map(Duration::from_millis),
                upgrade_path: Some(self.path.clone()),
            },
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            max_handshake_bytes: self.max_handshake_bytes,
        }
    }
}

/// Settings for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Engine configuration
    pub connection: ConnectionConfig,
    /// Time allowed for the opening handshake
    pub handshake_timeout: Duration,
    /// Largest accepted handshake request head
    pub max_handshake_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_handshake_bytes: DEFAULT_MAX_HEAD_SIZE,
        }
    }
}
