//! Deterministic simulation harness for the echoframe engine.
//!
//! Two layers:
//!
//! - Turmoil-based [`Environment`](echoframe_core::Environment) and
//!   [`Transport`](echoframe_core::Transport) implementations, so the real
//!   server and client run over a simulated network with seeded randomness
//!   and virtual time.
//! - A sans-IO [`scenario`] runner that drives [`Connection`] instances with
//!   scripted peers and checks the outcome with oracles, plus a reference
//!   [`model`] for model-based property tests.
//!
//! [`Connection`]: echoframe_core::Connection

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod scenario;
pub mod sim_env;
pub mod sim_transport;

pub use model::{ModelPeer, Operation};
pub use sim_env::SimEnv;
pub use sim_transport::SimTransport;
