//! Decoding arbitrary bytes never panics, and anything that decodes
//! re-encodes to the same bytes.

#![no_main]

use bytes::Bytes;
use etp_proto::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let input = Bytes::copy_from_slice(data);
    if let Ok(frame) = Frame::decode(input.clone()) {
        let encoded = frame.to_bytes().expect("decoded frame re-encodes");
        assert_eq!(encoded, input);
    }
});
