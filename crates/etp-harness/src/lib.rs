//! Test transports for the event protocol client.
//!
//! - [`mem`]: In-process duplex connections with fault injection and
//!   per-connection statistics
//! - [`accepted`]: Runs a full [`etp_client::Client`] over an already
//!   accepted connection, so tests can drive both ends with the same API
//! - [`sim_ws`]: WebSocket over turmoil's simulated TCP for deterministic
//!   end-to-end tests of the production adapter

pub mod accepted;
pub mod mem;
pub mod sim_ws;

pub use accepted::{AcceptedTransport, accept_client};
pub use mem::{ConnStats, Faults, MemConnection, MemListener, MemNetwork, MemTransport, pair};
pub use sim_ws::{SimWsListener, SimWsTransport};
