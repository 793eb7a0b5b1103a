//! Wire format for the ETP event protocol.
//!
//! Every transport message carries exactly one frame: a fixed 12-byte header
//! (zero-copy binary), the UTF-8 event name, then the opaque payload running
//! to the end of the message.
//!
//! ```text
//! offset  size  field
//! 0       1     version (currently 1)
//! 1       1     reserved (must be 0)
//! 2       2     event_len (u16, big endian, >= 1)
//! 4       8     correlation_id (u64, big endian, 0 = no reply expected)
//! 12      N     event name (N = event_len)
//! 12+N    ..    payload
//! ```
//!
//! Replies travel as acknowledgement frames: the originating event name with
//! the reserved [`ack::ACK_PREFIX`] applied and the same correlation id. This
//! layout is the contract any interoperating server has to speak.
//!
//! # Security
//!
//! Header parsing uses compile-time verified layouts via `zerocopy`. Lengths
//! are checked against the message before any slicing, and decoding never
//! trusts the event name to be valid UTF-8.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ack;
pub mod errors;
pub mod frame;
pub mod header;

pub use ack::{ACK_PREFIX, ack_event_name, is_ack_event, original_event_name};
pub use errors::{ProtocolError, Result};
pub use frame::{Frame, encode};
pub use header::FrameHeader;
