//! Transport abstraction for duplex message streams.
//!
//! Abstracts over WebSocket-like connections: message oriented, full duplex,
//! with connection-level close codes and keep-alive pings. Production uses
//! `tokio-tungstenite` (see `etp-client`'s `transport` feature), tests use the
//! in-memory and simulated transports from `etp-harness`.
//!
//! Handshake, TLS, framing and flow control all live behind this boundary.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// Kind of a transport message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// UTF-8 text message
    Text,
    /// Binary message
    Binary,
}

/// Connection close status code (RFC 6455 numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Normal closure.
    pub const NORMAL: Self = Self(1000);
    /// Endpoint going away (used when the owning scope is cancelled).
    pub const GOING_AWAY: Self = Self(1001);
    /// Protocol error.
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// Unexpected condition (used after a failed read).
    pub const INTERNAL_ERROR: Self = Self(1011);
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options for establishing a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialOptions {
    /// Extra HTTP headers sent with the opening handshake.
    pub headers: Vec<(String, String)>,
    /// Upper bound on the opening handshake. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Largest inbound message the transport buffers, in bytes (0 keeps the
    /// transport's own limit).
    pub read_limit: usize,
}

/// Factory for connections to a remote endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection handle produced by [`Transport::dial`].
    type Connection: TransportConnection;

    /// Connect to `address` and complete the opening handshake.
    async fn dial(
        &self,
        address: &str,
        options: &DialOptions,
    ) -> Result<Self::Connection, TransportError>;
}

/// An established duplex message stream.
///
/// `read` and `write` are called concurrently from different tasks: one
/// reader at a time, and writes serialized by the caller. Implementations
/// must tolerate `close` racing with both.
#[async_trait]
pub trait TransportConnection: Send + Sync + 'static {
    /// Send one complete message.
    async fn write(&self, kind: MessageKind, data: Bytes) -> Result<(), TransportError>;

    /// Receive the next complete message.
    ///
    /// Returns [`TransportError::Closed`] once the peer closed the
    /// connection cleanly.
    async fn read(&self) -> Result<(MessageKind, Bytes), TransportError>;

    /// Close the connection with a status code and reason.
    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError>;

    /// Round-trip a keep-alive ping, resolving when the pong arrives.
    async fn ping(&self) -> Result<(), TransportError>;

    /// Reject inbound messages larger than `limit` bytes.
    fn set_read_limit(&self, limit: usize);
}
