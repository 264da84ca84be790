//! echoframe protocol core logic
//!
//! Pure state machine logic for a server-side WebSocket endpoint, decoupled
//! from I/O.
//!
//! # Architecture
//!
//! Protocol logic in this crate is implemented as deterministic state
//! machines that are isolated from I/O, time, randomness, and scheduling.
//! All external effects are supplied explicitly by the caller.
//!
//! State transitions produce declarative actions that describe intended
//! effects rather than executing them directly. A runtime or test harness
//! is responsible for interpreting and executing these actions.
//!
//! # Components
//!
//! - [`handshake`]: HTTP Upgrade validation and the accept key
//! - [`reassembler`]: Fragmented message accumulation
//! - [`connection`]: Connection state machine (handshake, frames, timers)
//! - [`close`]: Two-sided close handshake bookkeeping
//! - [`handler`]: Application slot ([`EchoHandler`])
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`transport`]: Transport abstraction (byte streams)
//! - [`error`]: Connection error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod close;
pub mod connection;
pub mod env;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod reassembler;
pub mod transport;

pub use close::{CloseNegotiation, CloseStep, Initiator};
pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState};
pub use env::{Environment, SystemEnv};
pub use error::ConnectionError;
pub use handler::{EchoHandler, MessageHandler};
pub use handshake::{
    ClientHandshake, HandshakeError, HandshakeResponse, HttpRequest, HttpResponse, ServerHandshake,
};
pub use reassembler::Reassembler;
pub use transport::Transport;
