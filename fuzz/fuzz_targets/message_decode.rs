//! Header decoding must never panic, whatever the bytes and version.
//!
//! The first input byte selects the version so retired and unknown versions
//! are exercised too.

#![no_main]

use ist_proto::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&version, rest)) = data.split_first() else {
        return;
    };

    if let Ok(message) = Message::decode(version, rest, 0) {
        // Anything that decodes must encode back to the same header bytes.
        let encoded = message.to_vec().unwrap();
        let size = encoded.len();
        assert_eq!(&rest[..size], &encoded[..]);
    }
});
