//! Connection registry: the connection → rooms view.
//!
//! Each admitted connection has one entry holding its identity and the set of
//! rooms it currently belongs to. The room → connections view lives in
//! [`crate::RoomDirectory`]; [`crate::Lifecycle`] keeps the two in step, which
//! is why the membership mutators here are crate-private.

use std::collections::{BTreeSet, HashMap};

use roomcast_proto::RoomId;

use crate::{ConnectionId, error::CoreError};

/// Who a connection is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Display identity declared by the client. Not unique, not verified.
    pub identity: String,
    /// Namespace the connection was admitted on
    pub namespace: String,
    /// Identity vouched for by the authenticator, for gated namespaces
    pub principal: Option<String>,
}

impl ConnectionInfo {
    /// Info for a connection admitted without a credential check.
    pub fn new(identity: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { identity: identity.into(), namespace: namespace.into(), principal: None }
    }

    /// Attach the authenticated principal.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }
}

/// Returned by [`ConnectionRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    /// Registered id
    pub id: ConnectionId,
    /// Registered display identity
    pub identity: String,
}

#[derive(Debug)]
struct Entry {
    info: ConnectionInfo,
    rooms: BTreeSet<RoomId>,
}

/// Live connections and their room memberships.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<ConnectionId, Entry>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with an empty room set.
    ///
    /// # Errors
    ///
    /// - `CoreError::DuplicateConnection` if `id` is already registered
    pub fn register(
        &mut self,
        id: ConnectionId,
        info: ConnectionInfo,
    ) -> Result<ConnectionHandle, CoreError> {
        if self.entries.contains_key(&id) {
            return Err(CoreError::DuplicateConnection(id));
        }

        let handle = ConnectionHandle { id, identity: info.identity.clone() };
        self.entries.insert(id, Entry { info, rooms: BTreeSet::new() });
        Ok(handle)
    }

    /// Remove a connection, returning its info and the rooms it was in.
    ///
    /// Unknown ids are a no-op: disconnect notifications may race with
    /// application-level cleanup.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<(ConnectionInfo, BTreeSet<RoomId>)> {
        self.entries.remove(&id).map(|entry| (entry.info, entry.rooms))
    }

    /// Rooms a connection belongs to.
    ///
    /// # Errors
    ///
    /// - `CoreError::UnknownConnection` if `id` is not registered
    pub fn rooms_of(&self, id: ConnectionId) -> Result<&BTreeSet<RoomId>, CoreError> {
        self.entries.get(&id).map(|e| &e.rooms).ok_or(CoreError::UnknownConnection(id))
    }

    /// Connection metadata. `None` if not registered.
    pub fn info(&self, id: ConnectionId) -> Option<&ConnectionInfo> {
        self.entries.get(&id).map(|e| &e.info)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    /// All registered connection ids, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.entries.keys().copied()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record membership. Returns `false` if `id` is unknown.
    pub(crate) fn add_room(&mut self, id: ConnectionId, room_id: &RoomId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.rooms.insert(room_id.clone());
                true
            },
            None => false,
        }
    }

    /// Drop membership. Returns `true` if it was recorded.
    pub(crate) fn remove_room(&mut self, id: ConnectionId, room_id: &str) -> bool {
        self.entries.get_mut(&id).is_some_and(|entry| entry.rooms.remove(room_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> ConnectionInfo {
        ConnectionInfo::new("alice", "/")
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ConnectionRegistry::new();

        let handle = registry.register(1, alice()).unwrap();
        assert_eq!(handle, ConnectionHandle { id: 1, identity: "alice".to_string() });
        assert!(registry.contains(1));
        assert!(!registry.contains(2));
        assert!(registry.rooms_of(1).unwrap().is_empty());
        assert_eq!(registry.info(1).unwrap().identity, "alice");
    }

    #[test]
    fn register_duplicate_fails() {
        let mut registry = ConnectionRegistry::new();

        registry.register(1, alice()).unwrap();
        assert_eq!(registry.register(1, alice()), Err(CoreError::DuplicateConnection(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rooms_of_unknown_connection_fails() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.rooms_of(9), Err(CoreError::UnknownConnection(9)));
    }

    #[test]
    fn unregister_returns_rooms() {
        let mut registry = ConnectionRegistry::new();
        registry.register(1, alice()).unwrap();
        registry.add_room(1, &RoomId::from("ABC123"));
        registry.add_room(1, &RoomId::from("XYZ"));

        let (info, rooms) = registry.unregister(1).unwrap();
        assert_eq!(info, alice());
        assert_eq!(rooms.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.unregister(42).is_none());
        assert!(registry.unregister(42).is_none());
    }

    #[test]
    fn membership_requires_registration() {
        let mut registry = ConnectionRegistry::new();
        assert!(!registry.add_room(1, &RoomId::from("ABC123")));
        assert!(!registry.remove_room(1, "ABC123"));
    }

    #[test]
    fn principal_is_kept_separately() {
        let info = ConnectionInfo::new("bob", "/user").with_principal("tok-bob");
        assert_eq!(info.identity, "bob");
        assert_eq!(info.principal.as_deref(), Some("tok-bob"));
    }
}
