//! Connect-time admission.
//!
//! Some namespaces are gated: a connection arriving there must present a token
//! that an [`Authenticator`] turns into an identity. Everything else is
//! admitted with the identity the client declared. The core never inspects
//! tokens itself; it only consumes the authenticator's verdict.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use thiserror::Error;

/// Why a gated connection was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Gated namespace but no token in the Hello
    #[error("token required for namespace {0}")]
    MissingToken(String),
    /// Authenticator rejected the token
    #[error("invalid token")]
    InvalidToken,
    /// Authenticator did not answer in time
    #[error("authentication timed out")]
    Timeout,
    /// Authenticator failed for reasons of its own
    #[error("authenticator unavailable: {0}")]
    Unavailable(String),
}

/// Token verification collaborator.
///
/// Must be a pure function of the token as far as the core can observe.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a token to the identity it vouches for.
    async fn authenticate(&self, token: &str) -> Result<String, AdmissionError>;
}

/// Treats any non-empty token as its own identity.
///
/// Suitable only where tokens are already trusted, e.g. behind an
/// authenticating proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenIdentity;

#[async_trait]
impl Authenticator for TokenIdentity {
    async fn authenticate(&self, token: &str) -> Result<String, AdmissionError> {
        if token.is_empty() {
            return Err(AdmissionError::InvalidToken);
        }
        Ok(token.to_string())
    }
}

/// Fixed token → identity table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    /// Empty table; every token is refused.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token.
    #[must_use]
    pub fn with(mut self, token: impl Into<String>, identity: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), identity.into());
        self
    }

    /// Parse `TOKEN=IDENTITY`.
    pub fn parse_entry(entry: &str) -> Option<(String, String)> {
        let (token, identity) = entry.split_once('=')?;
        if token.is_empty() || identity.is_empty() {
            return None;
        }
        Some((token.to_string(), identity.to_string()))
    }

    /// Number of known tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl FromIterator<(String, String)> for StaticTokens {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self { tokens: iter.into_iter().collect() }
    }
}

#[async_trait]
impl Authenticator for StaticTokens {
    async fn authenticate(&self, token: &str) -> Result<String, AdmissionError> {
        self.tokens.get(token).cloned().ok_or(AdmissionError::InvalidToken)
    }
}

/// Which namespaces require a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionPolicy {
    gated: BTreeSet<String>,
}

impl AdmissionPolicy {
    /// Namespace gated by default.
    pub const DEFAULT_GATED_NAMESPACE: &'static str = "/user";

    /// Gate exactly the given namespaces.
    pub fn gated<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { gated: namespaces.into_iter().map(Into::into).collect() }
    }

    /// Gate nothing.
    pub fn open() -> Self {
        Self { gated: BTreeSet::new() }
    }

    /// Whether a connection on `namespace` must authenticate.
    pub fn requires_token(&self, namespace: &str) -> bool {
        self.gated.contains(namespace)
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::gated([Self::DEFAULT_GATED_NAMESPACE])
    }
}
