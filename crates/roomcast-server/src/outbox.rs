//! Per-connection outboxes.
//!
//! Every connection owns a bounded queue drained by its own writer task. The
//! router enqueues with [`Outbox::try_send`], which never waits: when a slow
//! reader lets its queue fill, deliveries to that reader are dropped and
//! reported as [`SendError::Full`] while everyone else carries on.

use std::{collections::HashMap, time::Duration};

use quinn::SendStream;
use roomcast_core::{ConnectionId, Outbound, SendError};
use roomcast_proto::Frame;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::transport::QuinnConnection;

/// How long a closing connection waits for the peer to acknowledge queued
/// frames before the connection is torn down.
const CLOSE_LINGER: Duration = Duration::from_secs(2);

/// Work item for a writer task.
#[derive(Debug)]
pub enum Outgoing {
    /// Write a frame
    Frame(Frame),
    /// Flush, then close the connection
    Close {
        /// Reason sent to the peer
        reason: String,
    },
}

/// Sending half of one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Outgoing>,
}

impl Outbox {
    /// Create an outbox holding at most `capacity` pending items.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a frame without waiting.
    pub fn try_send(&self, frame: &Frame) -> Result<(), SendError> {
        self.tx.try_send(Outgoing::Frame(frame.clone())).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Ask the writer to flush and close. Returns `false` if the request could
    /// not be queued, in which case the caller must close the connection
    /// itself.
    pub fn request_close(&self, reason: String) -> bool {
        self.tx.try_send(Outgoing::Close { reason }).is_ok()
    }
}

/// Drain `rx` onto `send` until the queue closes or a close is requested.
pub async fn run_writer(
    connection_id: ConnectionId,
    connection: QuinnConnection,
    mut send: SendStream,
    mut rx: mpsc::Receiver<Outgoing>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Outgoing::Frame(frame) => {
                let buf = match frame.to_vec() {
                    Ok(buf) => buf,
                    Err(e) => {
                        tracing::warn!(connection_id, error = %e, "dropping unencodable frame");
                        continue;
                    },
                };

                if let Err(e) = send.write_all(&buf).await {
                    tracing::debug!(connection_id, error = %e, "delivery stream failed");
                    break;
                }
            },
            Outgoing::Close { reason } => {
                if send.finish().is_ok() {
                    let _ = tokio::time::timeout(CLOSE_LINGER, send.stopped()).await;
                }
                connection.close(&reason);
                break;
            },
        }
    }
}

/// Outboxes of every live connection, keyed by connection id.
#[derive(Debug, Default)]
pub struct OutboxTable {
    outboxes: HashMap<ConnectionId, (Outbox, QuinnConnection)>,
}

impl OutboxTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outbox. Returns `false` if the id is already taken.
    pub fn insert(
        &mut self,
        connection_id: ConnectionId,
        outbox: Outbox,
        connection: QuinnConnection,
    ) -> bool {
        if self.outboxes.contains_key(&connection_id) {
            return false;
        }
        self.outboxes.insert(connection_id, (outbox, connection));
        true
    }

    /// Drop a connection's outbox. Its writer finishes once the queue drains.
    pub fn remove(&mut self, connection_id: ConnectionId) {
        self.outboxes.remove(&connection_id);
    }

    /// Whether an id is in use.
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.outboxes.contains_key(&connection_id)
    }

    /// Number of registered outboxes.
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// Whether no outbox is registered.
    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }

    /// Close a connection after its queued frames are flushed.
    pub fn close(&self, connection_id: ConnectionId, reason: &str) {
        if let Some((outbox, connection)) = self.outboxes.get(&connection_id) {
            if !outbox.request_close(reason.to_string()) {
                connection.close(reason);
            }
        }
    }
}

impl Outbound for OutboxTable {
    fn try_send(&self, to: ConnectionId, frame: &Frame) -> Result<(), SendError> {
        self.outboxes.get(&to).ok_or(SendError::NoRoute)?.0.try_send(frame)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use roomcast_proto::{FrameHeader, Opcode};

    use super::*;

    fn frame(body: &'static [u8]) -> Frame {
        Frame::new(FrameHeader::new(Opcode::GlobalMessage), body)
    }

    #[test]
    fn full_outbox_reports_full() {
        let (outbox, _rx) = Outbox::channel(1);

        assert_eq!(outbox.try_send(&frame(b"a")), Ok(()));
        assert_eq!(outbox.try_send(&frame(b"b")), Err(SendError::Full));
    }

    #[test]
    fn dropped_writer_reports_closed() {
        let (outbox, rx) = Outbox::channel(4);
        drop(rx);

        assert_eq!(outbox.try_send(&frame(b"a")), Err(SendError::Closed));
        assert!(!outbox.request_close("bye".to_string()));
    }

    #[test]
    fn queued_frames_come_out_in_order() {
        let (outbox, mut rx) = Outbox::channel(8);
        for body in [b"one".as_slice(), b"two", b"three"] {
            outbox.try_send(&Frame::new(FrameHeader::new(Opcode::GlobalMessage), body)).unwrap();
        }
        outbox.request_close("done".to_string());

        let mut seen = Vec::new();
        while let Ok(item) = rx.try_recv() {
            seen.push(item);
        }

        assert_eq!(seen.len(), 4);
        assert!(matches!(&seen[0], Outgoing::Frame(f) if f.payload.as_ref() == b"one"));
        assert!(matches!(&seen[2], Outgoing::Frame(f) if f.payload.as_ref() == b"three"));
        assert!(matches!(&seen[3], Outgoing::Close { reason } if reason == "done"));
    }

    #[test]
    fn unknown_recipient_has_no_route() {
        let table = OutboxTable::new();
        assert_eq!(table.try_send(7, &frame(b"x")), Err(SendError::NoRoute));
        assert!(table.is_empty());
    }

    proptest! {
        #[test]
        fn accepts_exactly_capacity_frames(capacity in 1usize..64, extra in 1usize..8) {
            let (outbox, _rx) = Outbox::channel(capacity);

            for _ in 0..capacity {
                prop_assert_eq!(outbox.try_send(&frame(b"m")), Ok(()));
            }
            for _ in 0..extra {
                prop_assert_eq!(outbox.try_send(&frame(b"m")), Err(SendError::Full));
            }
        }
    }
}
