//! Frame type combining header and payload.
//!
//! A `Frame` is the transport-layer packet: a 16-byte binary header followed
//! by raw payload bytes. It is a pure data holder. For typed access see
//! [`crate::Payload::into_frame`] and [`crate::Payload::from_frame`].

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame
///
/// Layout on the wire: `[FrameHeader: 16 bytes] + [payload: variable bytes]`
///
/// # Invariants
///
/// - `payload.len()` matches `header.payload_size()`. Enforced by
///   [`Frame::new`] and verified by [`Frame::decode`].
/// - `payload.len()` never exceeds [`FrameHeader::MAX_PAYLOAD_SIZE`] on the
///   wire. Oversized frames can be built in memory but fail to encode.
///
/// Cloning is cheap: the payload is reference-counted, so a fan-out to many
/// recipients shares one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,

    /// Raw payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame, setting `payload_size` from the payload.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // Anything above u32::MAX is far beyond MAX_PAYLOAD_SIZE; saturate so
        // encode() rejects it instead of silently wrapping.
        let payload_len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        header.set_payload_size(payload_len);

        Self { header, payload }
    }

    /// Total encoded length (header plus payload).
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Encode frame into buffer
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds `MAX_PAYLOAD_SIZE`
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Encode into a fresh `Vec`.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode frame from wire format
    ///
    /// Only exactly `payload_size` bytes are consumed; trailing data is
    /// ignored. The payload is not interpreted.
    ///
    /// # Errors
    ///
    /// - Any header error from [`FrameHeader::from_bytes`]
    /// - `ProtocolError::FrameTruncated` if fewer payload bytes than claimed
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;
        let payload_size = header.payload_size() as usize;

        let body = bytes.get(FrameHeader::SIZE..FrameHeader::SIZE + payload_size).ok_or(
            ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            },
        )?;

        Ok(Self { header: *header, payload: Bytes::copy_from_slice(body) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opcode;

    #[test]
    fn new_sets_payload_size() {
        let frame = Frame::new(FrameHeader::new(Opcode::GlobalMessage), vec![1, 2, 3, 4]);
        assert_eq!(frame.header.payload_size(), 4);
        assert_eq!(frame.encoded_len(), FrameHeader::SIZE + 4);
    }

    #[test]
    fn frame_with_payload_round_trips() {
        let frame = Frame::new(FrameHeader::new(Opcode::GlobalMessage), b"hi".to_vec());

        let wire = frame.to_vec().expect("should encode");
        let parsed = Frame::decode(&wire).expect("should decode");

        assert_eq!(parsed, frame);
    }

    #[test]
    fn reject_truncated_frame() {
        let mut header = FrameHeader::new(Opcode::GlobalMessage);
        header.set_payload_size(100);

        let result = Frame::decode(&header.to_bytes());
        assert_eq!(result, Err(ProtocolError::FrameTruncated { expected: 100, actual: 0 }));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let frame = Frame::new(FrameHeader::new(Opcode::Ping), Vec::new());
        let mut wire = frame.to_vec().unwrap();
        wire.extend_from_slice(b"next frame");

        let parsed = Frame::decode(&wire).unwrap();
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn oversized_payload_fails_to_encode() {
        let big = vec![0u8; FrameHeader::MAX_PAYLOAD_SIZE as usize + 1];
        let frame = Frame::new(FrameHeader::new(Opcode::GlobalMessage), big);

        assert!(matches!(frame.to_vec(), Err(ProtocolError::PayloadTooLarge { .. })));
    }
}
