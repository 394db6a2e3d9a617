//! Fuzz target for Payload::from_frame
//!
//! Every opcode is tried against the same arbitrary payload bytes: malformed
//! CBOR, payloads meant for another opcode, oversized strings. Decoding must
//! return an error, never panic.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use roomcast_proto::{Frame, FrameHeader, Opcode, Payload};

fuzz_target!(|data: &[u8]| {
    for raw in 0x0000u16..=0x0110 {
        let Some(opcode) = Opcode::from_u16(raw) else {
            continue;
        };

        let frame = Frame::new(FrameHeader::new(opcode), Bytes::copy_from_slice(data));
        if let Ok(payload) = Payload::from_frame(&frame) {
            assert_eq!(payload.opcode(), opcode);
        }
    }
});
