//! Errors produced while encoding or decoding frames.

use thiserror::Error;

/// Result alias for wire codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Wire format violations.
///
/// Every decode variant means the message could not be split into the
/// `(event, correlation_id, payload)` triple. None of them are fatal to the
/// connection that delivered the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Message is shorter than the fixed header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Header carries a version this codec does not speak.
    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),

    /// Reserved header byte is not zero.
    #[error("reserved header byte must be zero, got {0:#04x}")]
    ReservedBitsSet(u8),

    /// Event name is empty.
    #[error("event name must not be empty")]
    EmptyEvent,

    /// Event name does not fit in the 16-bit length field.
    #[error("event name of {len} bytes exceeds maximum of {max}")]
    EventTooLong {
        /// Length of the rejected name
        len: usize,
        /// Maximum encodable length
        max: usize,
    },

    /// Declared event length runs past the end of the message.
    #[error("event name of {event_len} bytes overruns frame of {frame_len} bytes")]
    EventOverrun {
        /// Declared event name length
        event_len: usize,
        /// Total message length
        frame_len: usize,
    },

    /// Event name bytes are not valid UTF-8.
    #[error("event name is not valid UTF-8")]
    InvalidEventName,
}

impl ProtocolError {
    /// True for errors raised while decoding a received message.
    pub fn is_malformed_frame(&self) -> bool {
        !matches!(self, Self::EventTooLong { .. })
    }
}
