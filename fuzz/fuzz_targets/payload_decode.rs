//! Frame and payload decoding must never panic.

#![no_main]

use ist_proto::{Frame, Payload};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&version, rest)) = data.split_first() else {
        return;
    };

    if let Ok((frame, consumed)) = Frame::decode(version, rest) {
        assert!(consumed <= rest.len());
        let _ = Payload::from_frame(frame);
    }
});
