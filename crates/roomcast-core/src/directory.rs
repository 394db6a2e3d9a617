//! Room directory: the room → members view.
//!
//! Rooms are demand-created on first join and dropped when the last member
//! leaves, so a room id present in the directory always has at least one
//! member. There is no "room exists" check to pass: knowing the id is enough
//! to join.

use std::collections::{BTreeSet, HashMap};

use roomcast_proto::RoomId;

use crate::ConnectionId;

/// Rooms and their member connections.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, BTreeSet<ConnectionId>>,
}

impl RoomDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection_id` to the room, creating it if absent.
    ///
    /// Returns `false` if it was already a member (membership unchanged).
    pub fn join(&mut self, room_id: &RoomId, connection_id: ConnectionId) -> bool {
        match self.rooms.get_mut(room_id.as_str()) {
            Some(members) => members.insert(connection_id),
            None => {
                self.rooms.insert(room_id.clone(), BTreeSet::from([connection_id]));
                true
            },
        }
    }

    /// Remove `connection_id` from the room, dropping the room if it empties.
    ///
    /// Returns `false` if it was not a member.
    pub fn leave(&mut self, room_id: &str, connection_id: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(room_id) else {
            return false;
        };

        let removed = members.remove(&connection_id);
        if members.is_empty() {
            self.rooms.remove(room_id);
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn retain_empty(&mut self, room_id: RoomId) {
        self.rooms.entry(room_id).or_default();
    }

    /// Snapshot of a room's members. Empty for a room that never existed.
    pub fn members_of(&self, room_id: &str) -> BTreeSet<ConnectionId> {
        self.rooms.get(room_id).cloned().unwrap_or_default()
    }

    /// Whether `connection_id` is in the room.
    pub fn is_member(&self, room_id: &str, connection_id: ConnectionId) -> bool {
        self.rooms.get(room_id).is_some_and(|m| m.contains(&connection_id))
    }

    /// Number of members in a room.
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, BTreeSet::len)
    }

    /// All live rooms, in no particular order.
    pub fn room_ids(&self) -> impl Iterator<Item = &RoomId> + '_ {
        self.rooms.keys()
    }

    /// Each live room with its members.
    pub fn iter(&self) -> impl Iterator<Item = (&RoomId, &BTreeSet<ConnectionId>)> + '_ {
        self.rooms.iter()
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
