//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while parsing or building frames and payloads.
///
/// All of these describe malformed input from a single peer. None of them are
/// fatal to a server; the offending frame is rejected and the peer told why.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Buffer shorter than a frame header
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Header magic does not match `RCST`
    #[error("invalid magic number")]
    InvalidMagic,

    /// Header version is not one we speak
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Payload exceeds [`crate::FrameHeader::MAX_PAYLOAD_SIZE`]
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Claimed or actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Fewer payload bytes than the header claims
    #[error("frame truncated: expected {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Payload bytes claimed by the header
        expected: usize,
        /// Payload bytes present
        actual: usize,
    },

    /// Opcode not defined by this protocol version
    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),

    /// CBOR serialization failed
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode error: {0}")]
    CborDecode(String),
}
