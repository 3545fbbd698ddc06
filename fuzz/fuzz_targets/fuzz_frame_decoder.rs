//! Fuzz target: `Frame::decode`
//!
//! Drives arbitrary byte sequences into the one-shot frame decoder and
//! asserts that it never panics and never yields a frame whose payload or
//! hop count fall outside the invariants the wire format guarantees.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use loramesh::frame::{Frame, MAX_PAYLOAD};

fuzz_target!(|data: &[u8]| {
    if let Some(frame) = Frame::decode(data) {
        assert!(
            frame.payload().len() <= MAX_PAYLOAD,
            "payload exceeds MAX_PAYLOAD"
        );
        assert!(frame.hops <= 6, "decoded frame must respect MAX_HOPS");
    }
});
