//! Frame header implementation with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 16-byte structure serialized as raw binary
//! (Big Endian). The server reads the opcode and payload size straight out of
//! the receive buffer without deserializing anything.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 16-byte frame header (Big Endian network byte order)
///
/// Fields are stored as raw byte arrays so the struct has alignment 1 and every
/// 16-byte pattern is a valid value. That makes the zero-copy cast from
/// untrusted network bytes safe; semantic validation (magic, version, size
/// limit) happens in [`FrameHeader::from_bytes`].
///
/// ```text
///  0       4   5   6       8               12              16
///  +-------+---+---+-------+---------------+---------------+
///  | magic |ver|flg|opcode |  request_id   | payload_size  |
///  +-------+---+---+-------+---------------+---------------+
/// ```
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    magic: [u8; 4],                   // 0x52435354 ("RCST")
    version: u8,                      // 0x01
    flags: u8,                        // reserved, zero
    pub(crate) opcode: [u8; 2],       // u16 operation code
    request_id: [u8; 4],              // u32 client nonce
    pub(crate) payload_size: [u8; 4], // u32 payload length
}

impl FrameHeader {
    /// Size of the serialized header
    pub const SIZE: usize = 16;

    /// Magic number: "RCST" in ASCII
    pub const MAGIC: u32 = 0x5243_5354;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (64 KiB). Chat traffic is short text.
    pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024;

    /// Create a new header with the specified opcode.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            flags: 0,
            opcode: opcode.to_u16().to_be_bytes(),
            request_id: [0; 4],
            payload_size: [0; 4],
        }
    }

    /// Parse header from network bytes (zero-copy).
    ///
    /// Trailing bytes after the header are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if buffer is shorter than 16 bytes
    /// - `ProtocolError::InvalidMagic` if magic number is invalid
    /// - `ProtocolError::UnsupportedVersion` if protocol version is unsupported
    /// - `ProtocolError::PayloadTooLarge` if payload size exceeds maximum
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let (header, _) = Self::ref_from_prefix(bytes).map_err(|_| {
            ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() }
        })?;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Protocol magic number.
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Protocol version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Reserved flag bits.
    #[must_use]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Operation code as raw u16.
    #[must_use]
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Operation code as enum. `None` if unrecognized.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Client-assigned nonce, echoed on direct replies.
    #[must_use]
    pub fn request_id(&self) -> u32 {
        u32::from_be_bytes(self.request_id)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Set client request nonce for response correlation.
    pub fn set_request_id(&mut self, request_id: u32) {
        self.request_id = request_id.to_be_bytes();
    }

    /// Set payload size. [`crate::Frame::new`] does this for you.
    pub fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size.to_be_bytes();
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("version", &self.version())
            .field("opcode", &format!("{:#06x}", self.opcode()))
            .field("request_id", &self.request_id())
            .field("payload_size", &self.payload_size())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn valid_prefix() -> [u8; FrameHeader::SIZE] {
        let mut buf = [0u8; FrameHeader::SIZE];
        buf[0..4].copy_from_slice(&FrameHeader::MAGIC.to_be_bytes());
        buf[4] = FrameHeader::VERSION;
        buf
    }

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<FrameHeader>(), FrameHeader::SIZE);
    }

    #[test]
    fn new_header_parses() {
        let header = FrameHeader::new(Opcode::JoinRoom);
        let bytes = header.to_bytes();
        let parsed = FrameHeader::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.opcode_enum(), Some(Opcode::JoinRoom));
        assert_eq!(parsed.payload_size(), 0);
        assert_eq!(parsed.flags(), 0);
    }

    proptest! {
        #[test]
        fn request_id_survives_serialization(request_id in any::<u32>(), size in 0u32..=FrameHeader::MAX_PAYLOAD_SIZE) {
            let mut header = FrameHeader::new(Opcode::Hello);
            header.set_request_id(request_id);
            header.set_payload_size(size);

            let bytes = header.to_bytes();
            let parsed = FrameHeader::from_bytes(&bytes).expect("should parse");
            prop_assert_eq!(parsed.request_id(), request_id);
            prop_assert_eq!(parsed.payload_size(), size);
        }
    }

    #[test]
    fn reject_short_buffer() {
        let result = FrameHeader::from_bytes(&[0u8; 10]);
        assert_eq!(result, Err(ProtocolError::FrameTooShort { expected: 16, actual: 10 }));
    }

    #[test]
    fn reject_invalid_magic() {
        let mut buf = valid_prefix();
        buf[0..4].copy_from_slice(&[0xFF; 4]);

        assert_eq!(FrameHeader::from_bytes(&buf), Err(ProtocolError::InvalidMagic));
    }

    #[test]
    fn reject_invalid_version() {
        let mut buf = valid_prefix();
        buf[4] = 0xFF;

        assert_eq!(FrameHeader::from_bytes(&buf), Err(ProtocolError::UnsupportedVersion(0xFF)));
    }

    #[test]
    fn reject_oversized_payload() {
        let mut buf = valid_prefix();
        buf[12..16].copy_from_slice(&(FrameHeader::MAX_PAYLOAD_SIZE + 1).to_be_bytes());

        assert!(matches!(
            FrameHeader::from_bytes(&buf),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }
}
