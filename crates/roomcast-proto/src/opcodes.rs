//! Frame operation codes.
//!
//! Session opcodes live in `0x00xx`, chat routing opcodes in `0x01xx`.

/// Operation code carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Client handshake: identity, namespace, optional token
    Hello = 0x0001,
    /// Server admission reply with the assigned connection id
    HelloReply = 0x0002,
    /// Keepalive request
    Ping = 0x0003,
    /// Keepalive response
    Pong = 0x0004,
    /// Graceful close
    Goodbye = 0x0005,
    /// Error report (server to client)
    Error = 0x000F,

    /// Global chat message, opaque payload, delivered to every connection
    GlobalMessage = 0x0100,
    /// Join a room and announce it to the members
    JoinRoom = 0x0101,
    /// Direct acknowledgement of a join
    JoinAck = 0x0102,
    /// Room-targeted message (also the delivery form of announcements)
    RoomMessage = 0x0103,
    /// Announce departure, then leave a room
    LeaveRoom = 0x0104,
    /// Server-authored notice that a member disconnected
    MemberDeparted = 0x0105,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a raw wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Hello),
            0x0002 => Some(Self::HelloReply),
            0x0003 => Some(Self::Ping),
            0x0004 => Some(Self::Pong),
            0x0005 => Some(Self::Goodbye),
            0x000F => Some(Self::Error),
            0x0100 => Some(Self::GlobalMessage),
            0x0101 => Some(Self::JoinRoom),
            0x0102 => Some(Self::JoinAck),
            0x0103 => Some(Self::RoomMessage),
            0x0104 => Some(Self::LeaveRoom),
            0x0105 => Some(Self::MemberDeparted),
            _ => None,
        }
    }

    /// Session-layer opcodes (handshake, keepalive, close, errors).
    #[must_use]
    pub const fn is_session(self) -> bool {
        self.to_u16() < 0x0100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Opcode; 12] = [
        Opcode::Hello,
        Opcode::HelloReply,
        Opcode::Ping,
        Opcode::Pong,
        Opcode::Goodbye,
        Opcode::Error,
        Opcode::GlobalMessage,
        Opcode::JoinRoom,
        Opcode::JoinAck,
        Opcode::RoomMessage,
        Opcode::LeaveRoom,
        Opcode::MemberDeparted,
    ];

    #[test]
    fn every_opcode_parses_back() {
        for opcode in ALL {
            assert_eq!(Opcode::from_u16(opcode.to_u16()), Some(opcode));
        }
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert_eq!(Opcode::from_u16(0x0000), None);
        assert_eq!(Opcode::from_u16(0x0106), None);
        assert_eq!(Opcode::from_u16(0xFFFF), None);
    }

    #[test]
    fn session_range() {
        assert!(Opcode::Hello.is_session());
        assert!(Opcode::Error.is_session());
        assert!(!Opcode::GlobalMessage.is_session());
        assert!(!Opcode::MemberDeparted.is_session());
    }
}
