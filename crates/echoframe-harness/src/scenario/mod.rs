//! Scenario testing with mandatory oracles.
//!
//! A scenario declares peers, a script of steps and clock advances, and an
//! oracle that checks the final [`World`]. Every peer talks to its own
//! server-side [`Connection`](echoframe_core::Connection) through in-memory
//! buffers: no sockets and no async runtime, so runs are fully
//! deterministic and timeouts cost nothing.
//!
//! ```text
//! Scenario::new("name")
//!     .peer("alice")
//!     .step("alice", Step::Send(..))
//!     .advance(Duration::from_secs(5))
//!     .oracle(oracle::all_echoed())   // required before run()
//!     .run()
//! ```

mod builder;
pub mod oracle;
mod world;

pub use builder::{RunnableScenario, Scenario};
pub use world::{Peer, Step, World};

/// Verification run against the final world state.
pub type OracleFn = Box<dyn Fn(&World) -> Result<(), String>>;
