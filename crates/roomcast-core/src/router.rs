//! Recipient resolution and fan-out.
//!
//! Resolution and delivery are split. [`Router`] borrows the membership views
//! and produces a [`Dispatch`]: a frame plus an owned recipient snapshot.
//! [`Router::dispatch`] then hands the frame to each recipient through an
//! [`Outbound`], typically after the caller has released whatever lock guards
//! the views. One slow recipient therefore never stalls resolution for
//! anyone else.
//!
//! Delivery is best-effort and per recipient. A recipient that vanished
//! between resolution and send is skipped; a recipient whose outbox is full
//! is counted as a failure. Neither aborts the rest of the fan-out.

use roomcast_proto::{Frame, RoomId};

use crate::{
    ConnectionId,
    directory::RoomDirectory,
    error::{CoreError, SendError},
    registry::ConnectionRegistry,
};

/// Per-connection send primitive supplied by the runtime.
///
/// Must not block: implementations enqueue or fail immediately.
pub trait Outbound {
    /// Hand `frame` to the connection's outbound stream.
    fn try_send(&self, to: ConnectionId, frame: &Frame) -> Result<(), SendError>;
}

/// Who a dispatch was addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connection, sender included
    Global,
    /// Members of one room
    Room(RoomId),
}

/// A frame and the recipients resolved for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Addressing mode
    pub audience: Audience,
    /// Connection that caused the dispatch. `None` for server-authored notices.
    pub origin: Option<ConnectionId>,
    /// Recipient snapshot, sorted and deduplicated
    pub recipients: Vec<ConnectionId>,
    /// Frame delivered to every recipient
    pub frame: Frame,
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Frames handed to an outbound stream
    pub delivered: usize,
    /// Recipients that disconnected before the send
    pub skipped: usize,
    /// Per-recipient failures, each a `CoreError::TransportSendFailure`
    pub failures: Vec<CoreError>,
}

impl DispatchReport {
    /// Number of failed recipients.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Recipient resolver over the two membership views.
#[derive(Debug, Clone, Copy)]
pub struct Router<'a> {
    registry: &'a ConnectionRegistry,
    directory: &'a RoomDirectory,
}

impl<'a> Router<'a> {
    /// Borrow the membership views.
    pub fn new(registry: &'a ConnectionRegistry, directory: &'a RoomDirectory) -> Self {
        Self { registry, directory }
    }

    /// Every registered connection, the sender included.
    pub fn global(&self, origin: ConnectionId, frame: Frame) -> Dispatch {
        let mut recipients: Vec<ConnectionId> = self.registry.ids().collect();
        recipients.sort_unstable();

        Dispatch { audience: Audience::Global, origin: Some(origin), recipients, frame }
    }

    /// Current members of `room_id`, the sender included if it is one.
    ///
    /// An unknown room resolves to nobody.
    pub fn room(&self, room_id: &RoomId, origin: Option<ConnectionId>, frame: Frame) -> Dispatch {
        let recipients = self
            .directory
            .members_of(room_id.as_str())
            .into_iter()
            .filter(|id| self.registry.contains(*id))
            .collect();

        Dispatch { audience: Audience::Room(room_id.clone()), origin, recipients, frame }
    }

    /// Hand the frame to each recipient. Never blocks, never aborts early.
    pub fn dispatch(dispatch: &Dispatch, outbound: &impl Outbound) -> DispatchReport {
        let mut report = DispatchReport::default();

        for &connection_id in &dispatch.recipients {
            match outbound.try_send(connection_id, &dispatch.frame) {
                Ok(()) => report.delivered += 1,
                Err(e) if e.is_departed() => report.skipped += 1,
                Err(reason) => {
                    report.failures.push(CoreError::TransportSendFailure { connection_id, reason });
                },
            }
        }

        report
    }
}
