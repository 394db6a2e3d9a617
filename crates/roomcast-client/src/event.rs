//! Classification of frames arriving from the server.

use bytes::Bytes;
use roomcast_proto::{ErrorPayload, Frame, Payload, RoomId};

use crate::error::ClientError;

/// What a server frame means to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Handshake accepted
    Welcome {
        /// Id the server assigned to this connection
        connection_id: u64,
        /// Identity the server admitted us under
        identity: String,
    },

    /// Global chat, including our own messages echoed back
    Global {
        /// Opaque body as the sender wrote it
        body: Bytes,
    },

    /// Room chat, or a join/leave announcement
    Room {
        /// Room the message was sent to
        room_id: RoomId,
        /// Opaque body as the sender wrote it
        body: Bytes,
    },

    /// Our join was applied
    Joined {
        /// Room joined
        room_id: RoomId,
        /// Member count after the join
        members: u32,
    },

    /// A room member disconnected without leaving
    MemberDeparted {
        /// Room they were in
        room_id: RoomId,
        /// Their connection id
        connection_id: u64,
        /// Their identity
        identity: String,
    },

    /// Server keepalive; the transport answers it with a pong
    Ping,

    /// Answer to our ping
    Pong,

    /// Server is closing the connection
    Goodbye {
        /// Why
        reason: String,
    },

    /// Server rejected something we sent
    Error {
        /// Error code, one of the [`ErrorPayload`] constants
        code: u16,
        /// Explanation
        message: String,
        /// Request id of the offending frame
        request_id: u32,
    },
}

impl ClientEvent {
    /// Classify a frame received from the server.
    ///
    /// Frames carrying client-to-server opcodes are rejected.
    pub fn from_frame(frame: &Frame) -> Result<Self, ClientError> {
        let event = match Payload::from_frame(frame)? {
            Payload::HelloReply(reply) => {
                Self::Welcome { connection_id: reply.connection_id, identity: reply.identity }
            },
            Payload::GlobalMessage(body) => Self::Global { body },
            Payload::RoomMessage(message) => {
                Self::Room { room_id: message.room_id, body: message.body }
            },
            Payload::JoinAck(ack) => Self::Joined { room_id: ack.room_id, members: ack.members },
            Payload::MemberDeparted(departed) => Self::MemberDeparted {
                room_id: departed.room_id,
                connection_id: departed.connection_id,
                identity: departed.identity,
            },
            Payload::Ping => Self::Ping,
            Payload::Pong => Self::Pong,
            Payload::Goodbye(goodbye) => Self::Goodbye { reason: goodbye.reason },
            Payload::Error(ErrorPayload { code, message }) => {
                Self::Error { code, message, request_id: frame.header.request_id() }
            },
            payload @ (Payload::Hello(_) | Payload::JoinRoom(_) | Payload::LeaveRoom(_)) => {
                return Err(ClientError::UnexpectedOpcode(payload.opcode()));
            },
        };

        Ok(event)
    }
}
