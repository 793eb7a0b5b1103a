//! Frame type and codec.

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::IntoBytes;

use crate::{
    ack,
    errors::{ProtocolError, Result},
    header::FrameHeader,
};

/// One logical message exchanged with the peer.
///
/// The payload is reference counted; decoding slices it out of the received
/// message without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event name (non-empty UTF-8).
    pub event: String,
    /// Correlation id; 0 means no reply is expected.
    pub correlation_id: u64,
    /// Opaque payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame.
    pub fn new(event: impl Into<String>, correlation_id: u64, payload: impl Into<Bytes>) -> Self {
        Self { event: event.into(), correlation_id, payload: payload.into() }
    }

    /// Acknowledgement frame answering `original_event`.
    pub fn ack(original_event: &str, correlation_id: u64, payload: impl Into<Bytes>) -> Self {
        Self::new(ack::ack_event_name(original_event), correlation_id, payload)
    }

    /// True if this frame is an acknowledgement.
    pub fn is_ack(&self) -> bool {
        ack::is_ack_event(&self.event)
    }

    /// True if the sender waits for a reply to this frame.
    pub fn expects_reply(&self) -> bool {
        self.correlation_id != 0 && !self.is_ack()
    }

    /// Number of bytes [`Frame::encode`] appends.
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.event.len() + self.payload.len()
    }

    /// Append the wire representation to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode(&self.event, self.correlation_id, &self.payload, dst)
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one frame from a complete transport message.
    pub fn decode(src: Bytes) -> Result<Self> {
        let (header, rest) = FrameHeader::parse(&src)?;

        let event_len = header.event_len();
        let Some(event_bytes) = rest.get(..event_len) else {
            return Err(ProtocolError::EventOverrun { event_len, frame_len: src.len() });
        };
        let event = std::str::from_utf8(event_bytes)
            .map_err(|_| ProtocolError::InvalidEventName)?
            .to_owned();

        let payload = src.slice(FrameHeader::SIZE + event_len..);
        Ok(Self { event, correlation_id: header.correlation_id(), payload })
    }
}

/// Append the wire representation of `(event, correlation_id, payload)` to
/// `dst`.
///
/// Deterministic: equal inputs always produce equal bytes. Nothing is
/// written when the event name is rejected.
pub fn encode(event: &str, correlation_id: u64, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let header = FrameHeader::new(event.len(), correlation_id)?;

    dst.reserve(FrameHeader::SIZE + event.len() + payload.len());
    dst.put_slice(header.as_bytes());
    dst.put_slice(event.as_bytes());
    dst.put_slice(payload);
    Ok(())
}
