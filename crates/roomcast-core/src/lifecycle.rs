//! Membership mutations over both views as one logical step.
//!
//! [`Lifecycle`] owns the [`ConnectionRegistry`] and the [`RoomDirectory`].
//! Every join, leave and disconnect updates both before returning, so
//! `rooms_of(c) == { r | c ∈ members_of(r) }` holds between any two calls.
//! Callers that need mutual exclusion wrap the whole `Lifecycle`, not the
//! views individually.

use std::collections::BTreeSet;

use roomcast_proto::{Frame, RoomId};

use crate::{
    ConnectionId,
    directory::RoomDirectory,
    error::CoreError,
    registry::{ConnectionHandle, ConnectionInfo, ConnectionRegistry},
    router::{Dispatch, Router},
};

/// What a disconnect left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Connection that went away
    pub connection_id: ConnectionId,
    /// Its registry entry
    pub info: ConnectionInfo,
    /// Each room it was in, with the members that remain (possibly none)
    pub rooms: Vec<(RoomId, BTreeSet<ConnectionId>)>,
}

/// Connection and room membership state.
#[derive(Debug, Default)]
pub struct Lifecycle {
    registry: ConnectionRegistry,
    directory: RoomDirectory,
}

impl Lifecycle {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an admitted connection with no rooms.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        info: ConnectionInfo,
    ) -> Result<ConnectionHandle, CoreError> {
        self.registry.register(connection_id, info)
    }

    /// Join a room, then resolve `announcement` to the post-join members.
    ///
    /// Re-joining leaves membership unchanged but still announces.
    ///
    /// # Errors
    ///
    /// - `CoreError::UnknownConnection` if the connection is not registered
    pub fn join_room(
        &mut self,
        connection_id: ConnectionId,
        room_id: &RoomId,
        announcement: Frame,
    ) -> Result<Dispatch, CoreError> {
        if !self.registry.add_room(connection_id, room_id) {
            return Err(CoreError::UnknownConnection(connection_id));
        }
        self.directory.join(room_id, connection_id);

        Ok(self.router().room(room_id, Some(connection_id), announcement))
    }

    /// Resolve `announcement` to the pre-leave members, then leave.
    ///
    /// The leaver is part of the pre-leave set and so receives its own notice.
    /// Leaving a room the connection is not in is a no-op and returns `None`.
    pub fn leave_room(
        &mut self,
        connection_id: ConnectionId,
        room_id: &RoomId,
        announcement: Frame,
    ) -> Option<Dispatch> {
        if !self.directory.is_member(room_id.as_str(), connection_id) {
            return None;
        }

        let dispatch = self.router().room(room_id, Some(connection_id), announcement);

        self.directory.leave(room_id.as_str(), connection_id);
        self.registry.remove_room(connection_id, room_id.as_str());

        Some(dispatch)
    }

    /// Unregister a connection and leave every room it was in.
    ///
    /// Idempotent: `None` for an unknown or already-departed connection.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Option<Departure> {
        let (info, rooms) = self.registry.unregister(connection_id)?;

        let rooms = rooms
            .into_iter()
            .map(|room_id| {
                self.directory.leave(room_id.as_str(), connection_id);
                let remaining = self.directory.members_of(room_id.as_str());
                (room_id, remaining)
            })
            .collect();

        Some(Departure { connection_id, info, rooms })
    }

    /// Resolver over the current views.
    pub fn router(&self) -> Router<'_> {
        Router::new(&self.registry, &self.directory)
    }

    /// Read-only connection view.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Read-only room view.
    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Verify the two views agree and no empty room is retained.
    ///
    /// # Errors
    ///
    /// - `CoreError::Inconsistent` naming the first disagreement found
    /// - `CoreError::EmptyRoom` if a room outlived its last member
    /// - `CoreError::UnknownConnection` if a room lists an unregistered member
    pub fn check_consistency(&self) -> Result<(), CoreError> {
        for connection_id in self.registry.ids() {
            for room_id in self.registry.rooms_of(connection_id)? {
                if !self.directory.is_member(room_id.as_str(), connection_id) {
                    return Err(CoreError::Inconsistent { room_id: room_id.clone(), connection_id });
                }
            }
        }

        for (room_id, members) in self.directory.iter() {
            if members.is_empty() {
                return Err(CoreError::EmptyRoom(room_id.clone()));
            }
            for &connection_id in members {
                if !self.registry.rooms_of(connection_id)?.contains(room_id) {
                    return Err(CoreError::Inconsistent { room_id: room_id.clone(), connection_id });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use roomcast_proto::{FrameHeader, Opcode};

    use super::*;

    fn note(text: &'static str) -> Frame {
        Frame::new(FrameHeader::new(Opcode::RoomMessage), text.as_bytes().to_vec())
    }

    fn with(ids: &[(ConnectionId, &str)]) -> Lifecycle {
        let mut lifecycle = Lifecycle::new();
        for &(id, name) in ids {
            lifecycle.register(id, ConnectionInfo::new(name, "/")).unwrap();
        }
        lifecycle
    }

    #[test]
    fn join_announces_to_post_join_members() {
        let mut lc = with(&[(1, "bob"), (2, "carol")]);
        let room = RoomId::from("ABC123");

        let first = lc.join_room(1, &room, note("bob joined")).unwrap();
        assert_eq!(first.recipients, vec![1]);

        let second = lc.join_room(2, &room, note("carol joined")).unwrap();
        assert_eq!(second.recipients, vec![1, 2]);
        lc.check_consistency().unwrap();
    }

    #[test]
    fn join_requires_registration() {
        let mut lc = Lifecycle::new();
        let result = lc.join_room(5, &RoomId::from("ABC123"), note("x"));

        assert_eq!(result, Err(CoreError::UnknownConnection(5)));
        assert_eq!(lc.directory().room_count(), 0);
    }

    #[test]
    fn leave_announces_to_pre_leave_members() {
        let mut lc = with(&[(1, "bob"), (2, "carol")]);
        let room = RoomId::from("ABC123");
        lc.join_room(1, &room, note("j")).unwrap();
        lc.join_room(2, &room, note("j")).unwrap();

        let dispatch = lc.leave_room(2, &room, note("carol left")).unwrap();
        assert_eq!(dispatch.recipients, vec![1, 2]);
        assert_eq!(lc.directory().members_of("ABC123"), BTreeSet::from([1]));
        lc.check_consistency().unwrap();
    }

    #[test]
    fn leave_when_not_member_is_noop() {
        let mut lc = with(&[(1, "bob"), (2, "carol")]);
        let room = RoomId::from("ABC123");
        lc.join_room(1, &room, note("j")).unwrap();

        assert!(lc.leave_room(2, &room, note("x")).is_none());
        assert!(lc.leave_room(2, &RoomId::from("ghost"), note("x")).is_none());
        assert_eq!(lc.directory().members_of("ABC123"), BTreeSet::from([1]));
    }

    #[test]
    fn disconnect_cleans_every_room() {
        let mut lc = with(&[(1, "bob"), (2, "carol")]);
        let shared = RoomId::from("ABC123");
        let solo = RoomId::from("SOLO");
        lc.join_room(1, &shared, note("j")).unwrap();
        lc.join_room(2, &shared, note("j")).unwrap();
        lc.join_room(2, &solo, note("j")).unwrap();

        let departure = lc.disconnect(2).unwrap();
        assert_eq!(departure.info.identity, "carol");
        assert_eq!(departure.rooms, vec![
            (shared.clone(), BTreeSet::from([1])),
            (solo, BTreeSet::new()),
        ]);

        assert_eq!(lc.directory().members_of("ABC123"), BTreeSet::from([1]));
        assert_eq!(lc.directory().room_count(), 1);
        lc.check_consistency().unwrap();

        assert!(lc.disconnect(2).is_none());
    }

    #[test]
    fn retained_empty_room_is_reported() {
        let mut lc = with(&[(0, "zero")]);
        lc.directory.retain_empty(RoomId::from("ghost"));

        assert_eq!(lc.check_consistency(), Err(CoreError::EmptyRoom(RoomId::from("ghost"))));
    }

    #[test]
    fn last_leave_removes_room() {
        let mut lc = with(&[(1, "bob")]);
        let room = RoomId::from("ABC123");
        lc.join_room(1, &room, note("j")).unwrap();
        lc.leave_room(1, &room, note("l")).unwrap();

        assert_eq!(lc.directory().room_count(), 0);
        assert!(lc.registry().rooms_of(1).unwrap().is_empty());
    }
}
