//! Reserved naming convention for acknowledgement frames.
//!
//! A reply to event `sum` travels as event `ack:sum` with the correlation id
//! of the request. Regular event names must not start with the prefix; a
//! client never routes an ack-named frame to a handler.

/// Prefix marking an event name as an acknowledgement.
pub const ACK_PREFIX: &str = "ack:";

/// True if `event` names an acknowledgement frame.
pub fn is_ack_event(event: &str) -> bool {
    original_event_name(event).is_some()
}

/// Acknowledgement event name answering `event`.
///
/// Only meaningful for a known originating event; the result of applying it
/// to a name that is already an ack name is not itself a valid reply name.
pub fn ack_event_name(event: &str) -> String {
    let mut name = String::with_capacity(ACK_PREFIX.len() + event.len());
    name.push_str(ACK_PREFIX);
    name.push_str(event);
    name
}

/// Originating event name of an acknowledgement, or `None` for regular
/// events.
pub fn original_event_name(event: &str) -> Option<&str> {
    event.strip_prefix(ACK_PREFIX).filter(|original| !original.is_empty())
}
