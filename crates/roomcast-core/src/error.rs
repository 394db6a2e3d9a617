//! Error types for the routing core.
//!
//! Every error here is scoped to one connection or one room. None of them is
//! fatal to the process: the driver turns them into an error frame, a close,
//! or a log line.

use roomcast_proto::{ProtocolError, RoomId};
use thiserror::Error;

use crate::{ConnectionId, session::SessionState};

/// Registry, lifecycle and dispatch errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Connection id already registered. Transport ids are unique, so this
    /// indicates a runtime bug.
    #[error("connection {0} already registered")]
    DuplicateConnection(ConnectionId),

    /// Connection id not registered.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Connect attempt refused before any state was created.
    #[error("admission refused for connection {connection_id}: {reason}")]
    AdmissionRefused {
        /// Refused connection
        connection_id: ConnectionId,
        /// Why
        reason: String,
    },

    /// One recipient of a fan-out could not be handed the frame.
    #[error("send to connection {connection_id} failed: {reason}")]
    TransportSendFailure {
        /// Recipient
        connection_id: ConnectionId,
        /// Underlying send error
        reason: SendError,
    },

    /// Registry and directory disagree.
    #[error("membership views diverged for room {room_id} and connection {connection_id}")]
    Inconsistent {
        /// Room in question
        room_id: RoomId,
        /// Connection in question
        connection_id: ConnectionId,
    },

    /// A room with no members was kept instead of dropped.
    #[error("room {0} retained with no members")]
    EmptyRoom(RoomId),

    /// Session state machine refused a transition.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Malformed frame or payload.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Per-recipient send failure reported by an [`crate::Outbound`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// No outbound channel for this connection (already gone)
    #[error("no route")]
    NoRoute,
    /// Channel exists but its writer has shut down
    #[error("channel closed")]
    Closed,
    /// Bounded outbox is full; the frame was dropped
    #[error("outbox full")]
    Full,
}

impl SendError {
    /// Whether the recipient is simply gone, as opposed to backed up.
    ///
    /// A departed recipient is skipped silently; a full outbox is a
    /// delivery failure worth counting.
    pub fn is_departed(self) -> bool {
        matches!(self, Self::NoRoute | Self::Closed)
    }
}

/// Session state machine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Transition not allowed from the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state
        state: SessionState,
        /// Attempted operation
        operation: &'static str,
    },

    /// Frame not valid in the current state
    #[error("unexpected frame: opcode {opcode:#06x} in state {state:?}")]
    UnexpectedFrame {
        /// Current state
        state: SessionState,
        /// Offending opcode
        opcode: u16,
    },

    /// Client speaks a protocol version we do not
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),
}
