//! Fuzz target for Frame::decode
//!
//! Arbitrary bytes must never panic the parser. Anything that does decode
//! must re-encode to exactly the bytes it was read from.

#![no_main]

use libfuzzer_sys::fuzz_target;
use roomcast_proto::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        let encoded = frame.to_vec().expect("decoded frame must re-encode");
        assert_eq!(&data[..encoded.len()], &encoded[..]);
    }
});
