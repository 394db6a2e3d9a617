//! Session payloads: handshake and graceful close.

use serde::{Deserialize, Serialize};

/// Client handshake, the first frame on every connection.
///
/// `identity` is the display name the client wants to appear under. It is not
/// unique and not verified. `token` is only consulted when `namespace`
/// requires admission control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version spoken by the client
    pub version: u8,
    /// Display identity
    pub identity: String,
    /// Namespace the client connects to (`/` unless stated)
    #[serde(default = "Hello::default_namespace")]
    pub namespace: String,
    /// Credential for gated namespaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Hello {
    /// Protocol version understood by this crate.
    pub const PROTOCOL_VERSION: u8 = 1;

    /// Namespace used when the client does not name one.
    pub const DEFAULT_NAMESPACE: &'static str = "/";

    /// Handshake on the default namespace.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            version: Self::PROTOCOL_VERSION,
            identity: identity.into(),
            namespace: Self::DEFAULT_NAMESPACE.to_string(),
            token: None,
        }
    }

    /// Target a namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Attach a credential.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn default_namespace() -> String {
        Self::DEFAULT_NAMESPACE.to_string()
    }
}

/// Server reply confirming admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    /// Connection id assigned by the server
    pub connection_id: u64,
    /// Identity the connection was registered under
    pub identity: String,
}

/// Graceful close notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Human-readable reason
    pub reason: String,
}
