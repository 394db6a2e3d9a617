//! Roomcast wire protocol.
//!
//! Every message on the wire is a [`Frame`]: a fixed 16-byte binary header
//! followed by a variable-length payload. The header carries everything the
//! server needs to route a frame (opcode, size); payloads are CBOR except for
//! global chat, whose payload is an opaque application blob that the server
//! forwards byte-for-byte.
//!
//! # Layers
//!
//! - [`FrameHeader`]: zero-copy parsed header (magic, version, opcode, sizes)
//! - [`Frame`]: header plus raw payload bytes, no payload interpretation
//! - [`Payload`]: typed view of a frame, one variant per [`Opcode`]
//! - [`ChatMessage`]: the conventional application body carried inside global
//!   and room messages. The server never decodes it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod frame;
mod header;
mod opcodes;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcodes::Opcode;
pub use payloads::{
    ErrorPayload, Payload,
    chat::ChatMessage,
    room::{JoinAck, JoinRoom, LeaveRoom, MemberDeparted, RoomId, RoomMessage},
    session::{Goodbye, Hello, HelloReply},
};

/// ALPN protocol identifier negotiated during the QUIC handshake.
pub const ALPN_PROTOCOL: &[u8] = b"roomcast";
