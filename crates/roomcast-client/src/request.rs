//! Outgoing request builders.
//!
//! Every request gets a fresh request id so direct replies (`HelloReply`,
//! `JoinAck`, `Error`) can be matched to what caused them.

use bytes::Bytes;
use roomcast_proto::{
    Frame, FrameHeader, Goodbye, Hello, JoinRoom, LeaveRoom, Payload, RoomId, RoomMessage,
};

use crate::error::ClientError;

/// Builds request frames with increasing request ids.
#[derive(Debug, Clone)]
pub struct Requests {
    next_request_id: u32,
}

impl Requests {
    /// Start numbering at 1.
    pub fn new() -> Self {
        Self { next_request_id: 1 }
    }

    /// Request id the next frame will carry.
    pub fn peek_request_id(&self) -> u32 {
        self.next_request_id
    }

    /// Handshake.
    pub fn hello(&mut self, hello: Hello) -> Result<Frame, ClientError> {
        self.build(Payload::Hello(hello))
    }

    /// Message to every connected client, sender included.
    pub fn global(&mut self, body: impl Into<Bytes>) -> Result<Frame, ClientError> {
        self.build(Payload::GlobalMessage(body.into()))
    }

    /// Join `room_id`; members (including us) receive `announcement`.
    pub fn join(
        &mut self,
        room_id: impl Into<RoomId>,
        announcement: impl Into<Bytes>,
    ) -> Result<Frame, ClientError> {
        self.build(Payload::JoinRoom(JoinRoom {
            room_id: room_id.into(),
            announcement: announcement.into(),
        }))
    }

    /// Message to every member of `room_id`.
    pub fn room_message(
        &mut self,
        room_id: impl Into<RoomId>,
        body: impl Into<Bytes>,
    ) -> Result<Frame, ClientError> {
        self.build(Payload::RoomMessage(RoomMessage { room_id: room_id.into(), body: body.into() }))
    }

    /// Leave `room_id`; members (including us) receive `announcement` first.
    pub fn leave(
        &mut self,
        room_id: impl Into<RoomId>,
        announcement: impl Into<Bytes>,
    ) -> Result<Frame, ClientError> {
        self.build(Payload::LeaveRoom(LeaveRoom {
            room_id: room_id.into(),
            announcement: announcement.into(),
        }))
    }

    /// Keepalive.
    pub fn ping(&mut self) -> Result<Frame, ClientError> {
        self.build(Payload::Ping)
    }

    /// Answer to a server ping.
    pub fn pong(&mut self) -> Result<Frame, ClientError> {
        self.build(Payload::Pong)
    }

    /// Graceful disconnect.
    pub fn goodbye(&mut self, reason: impl Into<String>) -> Result<Frame, ClientError> {
        self.build(Payload::Goodbye(Goodbye { reason: reason.into() }))
    }

    fn build(&mut self, payload: Payload) -> Result<Frame, ClientError> {
        let mut header = FrameHeader::new(payload.opcode());
        header.set_request_id(self.next_request_id);
        self.next_request_id = self.next_request_id.wrapping_add(1);
        Ok(payload.into_frame(header)?)
    }
}

impl Default for Requests {
    fn default() -> Self {
        Self::new()
    }
}
