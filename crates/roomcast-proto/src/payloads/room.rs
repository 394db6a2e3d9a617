//! Room routing payloads.
//!
//! Announcements and room chat bodies are opaque bytes: the server routes them
//! by `room_id` and never looks inside.

use std::{borrow::Borrow, fmt};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Opaque room identifier.
///
/// Any client that knows the token may join. The format is not validated;
/// clients conventionally generate short random alphanumeric strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a room token.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for RoomId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Join a room, then announce to its members (including the joiner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoom {
    /// Room to join
    pub room_id: RoomId,
    /// Opaque body delivered to members as a [`RoomMessage`]
    pub announcement: Bytes,
}

/// Direct reply to the joiner once membership is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAck {
    /// Room joined
    pub room_id: RoomId,
    /// Member count after the join
    pub members: u32,
}

/// Message addressed to a room.
///
/// Clients send this for in-room chat; the server uses the same shape to
/// deliver join and leave announcements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessage {
    /// Target room
    pub room_id: RoomId,
    /// Opaque application body
    pub body: Bytes,
}

/// Announce to the current members, then leave the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRoom {
    /// Room to leave
    pub room_id: RoomId,
    /// Opaque body delivered to members (including the leaver)
    pub announcement: Bytes,
}

/// Server-authored notice that a member's connection dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDeparted {
    /// Room the member was in
    pub room_id: RoomId,
    /// Connection that went away
    pub connection_id: u64,
    /// Its display identity
    pub identity: String,
}
