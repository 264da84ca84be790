//! WebSocket echo server.
//!
//! Tokio driver for the echoframe engine: accepts connections from any
//! [`Transport`](echoframe_core::Transport), runs one [`Session`] task per
//! connection and hands each complete message to a
//! [`MessageHandler`](echoframe_core::MessageHandler) (by default
//! [`EchoHandler`](echoframe_core::EchoHandler)).
//!
//! # Components
//!
//! - [`config`]: Command-line and per-session configuration
//! - [`session`]: Single-writer per-connection driver
//! - [`handle`]: Host handle for sending and closing
//! - [`server`]: Accept loop and graceful shutdown
//! - [`tcp`]: TCP transport

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handle;
pub mod server;
pub mod session;
pub mod tcp;

pub use config::{ServerConfig, SessionConfig};
pub use handle::ConnectionHandle;
pub use server::{EchoFactory, Server, ServerStats};
pub use session::{Command, Session, SessionSummary};
pub use tcp::TcpTransport;
