//! Error types.
//!
//! [`EtpError`] is the taxonomy callers and hooks observe. Lower layers keep
//! their own enums ([`TransportError`], [`AckError`],
//! [`etp_proto::ProtocolError`]) and are wrapped at the boundary where the
//! failure becomes meaningful to the caller.

use std::time::Duration;

use etp_proto::ProtocolError;
use thiserror::Error;

/// Failures reported by a transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("dial {address} failed: {reason}")]
    Dial {
        /// Address that was dialed
        address: String,
        /// Reason reported by the transport
        reason: String,
    },

    /// Opening handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// Connection is closed.
    #[error("connection closed")]
    Closed,

    /// Inbound message exceeded the configured read limit.
    #[error("message of {size} bytes exceeds read limit of {limit}")]
    ReadLimitExceeded {
        /// Size of the rejected message
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Transport-level protocol violation.
    #[error("transport protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal failures of a pending acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AckError {
    /// The caller's cancellation token fired first.
    #[error("acknowledgement wait canceled")]
    Canceled,

    /// The connection closed before the reply arrived.
    #[error("connection closed before acknowledgement arrived")]
    ConnectionClosed,

    /// Correlation id is already pending.
    #[error("correlation id {0} is already pending")]
    DuplicateId(u64),
}

/// Errors surfaced to callers of the client and to its hooks.
#[derive(Debug, Error)]
pub enum EtpError {
    /// Transport could not be established.
    #[error("dial failed: {0}")]
    Dial(#[source] TransportError),

    /// Received message could not be decoded; the message was dropped.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] ProtocolError),

    /// Outbound frame could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[source] ProtocolError),

    /// Transport write failed.
    #[error("write failed: {0}")]
    Write(#[source] TransportError),

    /// Transport read failed; the connection is closed.
    #[error("read failed: {0}")]
    Read(#[source] TransportError),

    /// Transport close failed.
    #[error("close failed: {0}")]
    Close(#[source] TransportError),

    /// Keep-alive ping failed.
    #[error("ping failed: {0}")]
    Ping(#[source] TransportError),

    /// Sending an acknowledgement for `event` failed.
    #[error("ack to event {event} failed: {source}")]
    AckWrite {
        /// Event being answered
        event: String,
        /// Transport failure
        #[source]
        source: TransportError,
    },

    /// A handler for `event` panicked; the event was dropped.
    #[error("handler for event {event} panicked")]
    HandlerPanicked {
        /// Event whose handler panicked
        event: String,
    },

    /// The governing cancellation token fired.
    #[error("operation canceled")]
    Canceled,

    /// The connection is closed (or closed while the operation was pending).
    #[error("connection closed")]
    ConnectionClosed,

    /// No connection has been dialed yet.
    #[error("not connected")]
    NotConnected,

    /// A connection is already open.
    #[error("already connected")]
    AlreadyConnected,

    /// Correlation id collided with a pending request.
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelationId(u64),
}

impl EtpError {
    /// True if the error ended (or reports the end of) the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Read(_) | Self::Canceled | Self::ConnectionClosed)
    }
}

impl From<AckError> for EtpError {
    fn from(err: AckError) -> Self {
        match err {
            AckError::Canceled => Self::Canceled,
            AckError::ConnectionClosed => Self::ConnectionClosed,
            AckError::DuplicateId(id) => Self::DuplicateCorrelationId(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_errors_map_to_caller_taxonomy() {
        assert!(matches!(EtpError::from(AckError::Canceled), EtpError::Canceled));
        assert!(matches!(EtpError::from(AckError::ConnectionClosed), EtpError::ConnectionClosed));
        assert!(matches!(
            EtpError::from(AckError::DuplicateId(9)),
            EtpError::DuplicateCorrelationId(9)
        ));
    }

    #[test]
    fn only_connection_ending_errors_are_fatal() {
        assert!(EtpError::Read(TransportError::Closed).is_fatal());
        assert!(EtpError::ConnectionClosed.is_fatal());
        assert!(!EtpError::MalformedFrame(ProtocolError::EmptyEvent).is_fatal());
        assert!(
            !EtpError::AckWrite { event: "sum".into(), source: TransportError::Closed }.is_fatal()
        );
    }

    #[test]
    fn ack_write_message_names_event() {
        let err = EtpError::AckWrite { event: "sum".into(), source: TransportError::Closed };
        assert_eq!(err.to_string(), "ack to event sum failed: connection closed");
    }
}
