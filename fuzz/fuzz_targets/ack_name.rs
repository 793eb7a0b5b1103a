//! Ack naming helpers agree with each other for arbitrary event names.

#![no_main]

use etp_proto::{ack_event_name, is_ack_event, original_event_name};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|event: &str| {
    let ack = ack_event_name(event);
    assert_eq!(is_ack_event(&ack), !event.is_empty());
    if !event.is_empty() {
        assert_eq!(original_event_name(&ack), Some(event));
    }
});
