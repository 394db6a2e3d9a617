//! Roomcast core: who is connected, who is in which room, and who receives
//! each message.
//!
//! Everything here is Sans-IO. The [`ServerDriver`] consumes [`ServerEvent`]s
//! and returns [`ServerAction`]s; a runtime (the QUIC server, or a test) owns
//! the sockets and executes the actions. Fan-out never happens under the
//! driver's state: a [`Dispatch`] carries a recipient snapshot, and
//! [`Router::dispatch`] hands it to an [`Outbound`] implementation afterwards.
//!
//! # Components
//!
//! - [`ConnectionRegistry`]: connection → identity and room set
//! - [`RoomDirectory`]: room → member set, the inverse view
//! - [`Router`]: recipient resolution for global and room delivery
//! - [`Lifecycle`]: join/leave/disconnect over both views as one step
//! - [`Session`]: per-connection admission and keepalive state machine
//! - [`Authenticator`]: pluggable token verification for gated namespaces

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod directory;
pub mod driver;
pub mod env;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod router;
pub mod session;

pub use auth::{AdmissionError, AdmissionPolicy, Authenticator, StaticTokens, TokenIdentity};
pub use directory::RoomDirectory;
pub use driver::{DisconnectPolicy, DriverConfig, LogLevel, ServerAction, ServerDriver, ServerEvent};
pub use env::Environment;
pub use error::{CoreError, SendError, SessionError};
pub use lifecycle::{Departure, Lifecycle};
pub use registry::{ConnectionHandle, ConnectionInfo, ConnectionRegistry};
pub use router::{Audience, Dispatch, DispatchReport, Outbound, Router};
pub use session::{Session, SessionAction, SessionConfig, SessionState};

/// Transport-assigned connection identifier.
pub type ConnectionId = u64;
