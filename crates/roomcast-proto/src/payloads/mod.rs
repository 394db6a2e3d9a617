//! Typed frame payloads.
//!
//! Session and room payloads are CBOR. Global chat is the exception: its
//! payload is the application blob itself, forwarded byte-for-byte, so the
//! server never pays for a decode on the hottest path.
//!
//! Only the inner struct is serialized; the header opcode identifies the
//! variant, so no enum tag appears in the CBOR.

pub mod chat;
pub mod room;
pub mod session;

use bytes::{BufMut, Bytes};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All frame payloads, one variant per [`Opcode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session
    /// Client handshake
    Hello(session::Hello),
    /// Server admission reply
    HelloReply(session::HelloReply),
    /// Keepalive request
    Ping,
    /// Keepalive response
    Pong,
    /// Graceful close
    Goodbye(session::Goodbye),
    /// Error report
    Error(ErrorPayload),

    // Chat routing
    /// Global chat message, opaque body
    GlobalMessage(Bytes),
    /// Join a room
    JoinRoom(room::JoinRoom),
    /// Join acknowledgement
    JoinAck(room::JoinAck),
    /// Room-targeted message
    RoomMessage(room::RoomMessage),
    /// Leave a room
    LeaveRoom(room::LeaveRoom),
    /// Disconnect notice
    MemberDeparted(room::MemberDeparted),
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code, one of the associated constants
    pub code: u16,
    /// Human-readable message
    pub message: String,
}

impl ErrorPayload {
    /// Frame not valid in the connection's current state.
    pub const PROTOCOL_VIOLATION: u16 = 0x0001;
    /// Payload failed to decode for its opcode.
    pub const INVALID_PAYLOAD: u16 = 0x0002;
    /// Admission to a gated namespace was refused.
    pub const ADMISSION_REFUSED: u16 = 0x0003;
    /// Chat operation attempted before admission.
    pub const NOT_ADMITTED: u16 = 0x0004;
    /// Connection limit reached.
    pub const SERVER_FULL: u16 = 0x0005;

    /// Create a protocol violation error.
    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        Self { code: Self::PROTOCOL_VIOLATION, message: msg.into() }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into() }
    }

    /// Create an admission refusal.
    pub fn admission_refused(reason: impl Into<String>) -> Self {
        Self { code: Self::ADMISSION_REFUSED, message: reason.into() }
    }

    /// Create a not-admitted error for the given opcode.
    pub fn not_admitted(opcode: Opcode) -> Self {
        Self {
            code: Self::NOT_ADMITTED,
            message: format!("{opcode:?} requires an admitted connection"),
        }
    }

    /// Create a server-full error.
    pub fn server_full(limit: usize) -> Self {
        Self { code: Self::SERVER_FULL, message: format!("connection limit {limit} reached") }
    }
}

impl From<ErrorPayload> for Payload {
    fn from(error: ErrorPayload) -> Self {
        Self::Error(error)
    }
}

fn cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::HelloReply(_) => Opcode::HelloReply,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::Goodbye(_) => Opcode::Goodbye,
            Self::Error(_) => Opcode::Error,
            Self::GlobalMessage(_) => Opcode::GlobalMessage,
            Self::JoinRoom(_) => Opcode::JoinRoom,
            Self::JoinAck(_) => Opcode::JoinAck,
            Self::RoomMessage(_) => Opcode::RoomMessage,
            Self::LeaveRoom(_) => Opcode::LeaveRoom,
            Self::MemberDeparted(_) => Opcode::MemberDeparted,
        }
    }

    /// Encode payload to buffer.
    ///
    /// Does not enforce [`FrameHeader::MAX_PAYLOAD_SIZE`]; [`Frame::encode`]
    /// does.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            Self::Ping | Self::Pong => return Ok(()),
            Self::GlobalMessage(body) => {
                dst.put_slice(body);
                return Ok(());
            },
            _ => {},
        }

        let mut writer = dst.writer();
        match self {
            Self::Ping | Self::Pong | Self::GlobalMessage(_) => Ok(()),
            Self::Hello(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::HelloReply(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Goodbye(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::JoinRoom(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::JoinAck(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::RoomMessage(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::LeaveRoom(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MemberDeparted(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload bytes for the given opcode.
    ///
    /// The size check runs before any CBOR parsing.
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(match opcode {
            Opcode::Hello => Self::Hello(cbor(bytes)?),
            Opcode::HelloReply => Self::HelloReply(cbor(bytes)?),
            Opcode::Ping => Self::Ping,
            Opcode::Pong => Self::Pong,
            Opcode::Goodbye => Self::Goodbye(cbor(bytes)?),
            Opcode::Error => Self::Error(cbor(bytes)?),
            Opcode::GlobalMessage => Self::GlobalMessage(Bytes::copy_from_slice(bytes)),
            Opcode::JoinRoom => Self::JoinRoom(cbor(bytes)?),
            Opcode::JoinAck => Self::JoinAck(cbor(bytes)?),
            Opcode::RoomMessage => Self::RoomMessage(cbor(bytes)?),
            Opcode::LeaveRoom => Self::LeaveRoom(cbor(bytes)?),
            Opcode::MemberDeparted => Self::MemberDeparted(cbor(bytes)?),
        })
    }

    /// Convert payload into a transport frame, stamping the opcode.
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf))
    }

    /// Parse payload from a raw transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is not defined
    /// - `ProtocolError::CborDecode` if the payload does not match the opcode
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }

    /// Build a frame with a fresh header. Shorthand for
    /// `into_frame(FrameHeader::new(opcode))`.
    pub fn to_frame(&self) -> Result<Frame> {
        self.clone().into_frame(FrameHeader::new(self.opcode()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatMessage, Hello, JoinRoom, RoomId};

    #[test]
    fn ping_has_empty_payload() {
        let frame = Payload::Ping.to_frame().unwrap();
        assert!(frame.payload.is_empty());
        assert_eq!(Payload::from_frame(&frame).unwrap(), Payload::Ping);
    }

    #[test]
    fn global_message_is_forwarded_verbatim() {
        let body = ChatMessage::new("m1", "alice", "hello", "t0").to_bytes().unwrap();
        let frame = Payload::GlobalMessage(body.clone()).to_frame().unwrap();

        assert_eq!(frame.payload, body);
        assert_eq!(frame.header.opcode_enum(), Some(Opcode::GlobalMessage));
    }

    #[test]
    fn into_frame_overrides_header_opcode() {
        let payload = Payload::JoinRoom(JoinRoom {
            room_id: RoomId::from("ABC123"),
            announcement: Bytes::from_static(b"alice joined"),
        });

        let mut header = FrameHeader::new(Opcode::Ping);
        header.set_request_id(7);
        let frame = payload.clone().into_frame(header).unwrap();

        assert_eq!(frame.header.opcode_enum(), Some(Opcode::JoinRoom));
        assert_eq!(frame.header.request_id(), 7);
        assert_eq!(Payload::from_frame(&frame).unwrap(), payload);
    }

    #[test]
    fn hello_without_namespace_defaults_to_root() {
        #[derive(Serialize)]
        struct LegacyHello {
            version: u8,
            identity: String,
        }

        let mut buf = Vec::new();
        ciborium::ser::into_writer(
            &LegacyHello { version: 1, identity: "bob".to_string() },
            &mut buf,
        )
        .unwrap();

        let Payload::Hello(hello) = Payload::decode(Opcode::Hello, &buf).unwrap() else {
            panic!("expected Hello");
        };
        assert_eq!(hello, Hello::new("bob"));
    }

    #[test]
    fn error_payload_round_trip() {
        let payload = Payload::Error(ErrorPayload::server_full(2));
        let frame = payload.to_frame().unwrap();
        assert_eq!(Payload::from_frame(&frame).unwrap(), payload);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut frame = Payload::Ping.to_frame().unwrap();
        frame.header.opcode = 0x7777u16.to_be_bytes();

        assert_eq!(Payload::from_frame(&frame), Err(ProtocolError::UnknownOpcode(0x7777)));
    }

    #[test]
    fn mismatched_payload_is_a_decode_error() {
        let result = Payload::decode(Opcode::JoinRoom, b"not cbor at all");
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }
}
