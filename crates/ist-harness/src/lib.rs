//! Deterministic simulation harness for IST testing.
//!
//! Turmoil-based [`ist_core::Transport`] implementation, a recording
//! [`ist_core::EventHandler`] and cache fixtures, so sender and receiver
//! sessions can be exercised end to end under controlled network
//! conditions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod handler;
pub mod sim_transport;

pub use fixtures::{init_tracing, kind_of, payload_of, populated_cache};
pub use handler::{Observed, RecordingHandler};
pub use sim_transport::{SimListener, SimTransport};
