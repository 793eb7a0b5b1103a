//! Event protocol client.
//!
//! Emits named events with opaque payloads, optionally awaiting a correlated
//! acknowledgement, and dispatches events from the peer to registered
//! handlers on a fixed worker pool.
//!
//! # Lifecycle
//!
//! ```text
//! ┌──────────┐  dial   ┌──────┐  close / read error / cancel  ┌─────────┐      ┌────────┐
//! │ Unopened │────────>│ Open │──────────────────────────────>│ Closing │─────>│ Closed │
//! └──────────┘         └──────┘                               └─────────┘      └────────┘
//!                         ↑                                                        │
//!                         └──────────────────────── dial ──────────────────────────┘
//! ```
//!
//! Whichever close trigger fires first runs the shutdown sequence; the others
//! observe the connection already closing. Pending acknowledgements fail with
//! [`EtpError::ConnectionClosed`] exactly once.
//!
//! # Example
//!
//! ```ignore
//! use etp_client::{Client, ClientConfig, WsTransport};
//!
//! let client = Client::new(WsTransport, ClientConfig::default());
//! client.on_with_ack("echo", |payload| payload);
//! client.dial("ws://127.0.0.1:9000/events").await?;
//! let reply = client.emit_with_ack("sum", b"\x01\x02").await?;
//! client.close().await?;
//! ```
//!
//! # Components
//!
//! - [`Client`]: Connection lifecycle, emit, handler registration
//! - [`ClientConfig`]: Worker pool, queue and handshake settings
//! - [`ws`]: WebSocket transport (feature `transport`)

mod client;
mod config;
mod session;
mod writer;

#[cfg(feature = "transport")]
pub mod ws;

pub use bytes::Bytes;
pub use client::Client;
pub use config::{ClientConfig, DEFAULT_QUEUE_MULTIPLIER, DEFAULT_WORKERS};
pub use etp_core::{
    CloseCode, DialOptions, EtpError, IdGenerator, MessageKind, SequentialIdGenerator, Transport,
    TransportConnection, TransportError,
};
pub use session::ConnectionState;
pub use tokio_util::sync::CancellationToken;
#[cfg(feature = "transport")]
pub use ws::{WsConnection, WsTransport};

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, EtpError>;
