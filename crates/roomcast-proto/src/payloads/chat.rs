//! Application chat body.
//!
//! This is what clients put inside global messages and room messages. The
//! server treats it as opaque bytes; only clients encode and decode it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// A chat line as rendered by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Client-assigned message id
    pub id: String,
    /// Sender display identity
    pub sender: String,
    /// Message text
    pub content: String,
    /// Client timestamp (RFC 3339 by convention)
    pub timestamp: String,
}

impl ChatMessage {
    /// Build a message.
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            content: content.into(),
            timestamp: timestamp.into(),
        }
    }

    /// CBOR-encode into an opaque body.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Decode an opaque body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
    }
}
