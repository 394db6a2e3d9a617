//! Client error types.

use roomcast_proto::{Opcode, ProtocolError};
use thiserror::Error;

/// Errors raised while building requests or reading server frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Frame or payload could not be encoded or decoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server sent an opcode only clients may send
    #[error("unexpected {0:?} from server")]
    UnexpectedOpcode(Opcode),

    /// The server refused the handshake
    #[error("refused by server ({code:#06x}): {message}")]
    Refused {
        /// Error code from the server
        code: u16,
        /// Server's explanation
        message: String,
    },

    /// The connection ended
    #[error("connection closed: {0}")]
    Closed(String),
}
