//! Roomcast client.
//!
//! The Sans-IO half is always available: [`Requests`] builds outgoing frames
//! with request ids, and [`ClientEvent::from_frame`] says what an incoming
//! frame means. Applications that bring their own transport need nothing
//! else.
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::Connection`]: frame channels bridged onto QUIC
//! - [`transport::connect`] and [`transport::connect_as`]: dial a server,
//!   optionally completing the handshake

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod event;
mod request;

#[cfg(feature = "transport")]
pub mod transport;

pub use error::ClientError;
pub use event::ClientEvent;
pub use request::Requests;
pub use roomcast_proto::{ChatMessage, Hello, RoomId};
