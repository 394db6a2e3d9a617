//! Server error types.

use roomcast_core::CoreError;
use roomcast_proto::ProtocolError;
use thiserror::Error;

/// Errors that can occur in the server runtime.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unreadable TLS material).
    ///
    /// Fatal at startup. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (endpoint failure, stream I/O).
    ///
    /// Fatal for the affected connection only, unless raised by the endpoint
    /// itself.
    #[error("transport error: {0}")]
    Transport(String),

    /// A peer sent bytes that are not a frame.
    ///
    /// The stream cannot be resynchronised, so the connection is closed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The routing core rejected an event.
    ///
    /// Scoped to the connection the event came from.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
