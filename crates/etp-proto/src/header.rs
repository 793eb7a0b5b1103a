//! Fixed frame header.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{BigEndian, U16, U64},
};

use crate::errors::{ProtocolError, Result};

/// 12-byte frame header preceding the event name.
///
/// All fields are unaligned big-endian integers so the header can be read
/// straight out of any received buffer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct FrameHeader {
    version: u8,
    reserved: u8,
    event_len: U16<BigEndian>,
    correlation_id: U64<BigEndian>,
}

impl FrameHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 12;

    /// Wire version written by this codec.
    pub const VERSION: u8 = 1;

    /// Longest event name the length field can describe.
    pub const MAX_EVENT_LEN: usize = u16::MAX as usize;

    /// Build a header for an event name of `event_len` bytes.
    pub fn new(event_len: usize, correlation_id: u64) -> Result<Self> {
        if event_len == 0 {
            return Err(ProtocolError::EmptyEvent);
        }
        let len = u16::try_from(event_len).map_err(|_| ProtocolError::EventTooLong {
            len: event_len,
            max: Self::MAX_EVENT_LEN,
        })?;

        Ok(Self {
            version: Self::VERSION,
            reserved: 0,
            event_len: U16::new(len),
            correlation_id: U64::new(correlation_id),
        })
    }

    /// Parse and validate the header at the start of `bytes`.
    ///
    /// Returns the header and the bytes following it.
    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8])> {
        let (header, rest) = Self::read_from_prefix(bytes).map_err(|_| {
            ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() }
        })?;

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }
        if header.reserved != 0 {
            return Err(ProtocolError::ReservedBitsSet(header.reserved));
        }
        if header.event_len() == 0 {
            return Err(ProtocolError::EmptyEvent);
        }

        Ok((header, rest))
    }

    /// Wire version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Length of the event name in bytes.
    pub fn event_len(&self) -> usize {
        usize::from(self.event_len.get())
    }

    /// Correlation id (0 when no reply is expected).
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id.get()
    }
}
