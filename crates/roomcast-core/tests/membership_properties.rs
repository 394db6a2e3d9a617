//! Property tests for membership consistency.
//!
//! Random sequences of register/join/leave/disconnect are applied to a
//! `Lifecycle`, and after every step the registry and directory must agree.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use roomcast_core::{ConnectionId, ConnectionInfo, Lifecycle};
use roomcast_proto::{Frame, FrameHeader, Opcode, RoomId};

#[derive(Debug, Clone)]
enum Op {
    Register(ConnectionId),
    Join(ConnectionId, u8),
    Leave(ConnectionId, u8),
    Disconnect(ConnectionId),
}

fn op() -> impl Strategy<Value = Op> {
    let id = 0u64..6;
    let room = 0u8..4;
    prop_oneof![
        id.clone().prop_map(Op::Register),
        (id.clone(), room.clone()).prop_map(|(c, r)| Op::Join(c, r)),
        (id.clone(), room).prop_map(|(c, r)| Op::Leave(c, r)),
        id.prop_map(Op::Disconnect),
    ]
}

fn room(r: u8) -> RoomId {
    RoomId::new(format!("ROOM{r}"))
}

fn note() -> Frame {
    Frame::new(FrameHeader::new(Opcode::RoomMessage), Vec::new())
}

/// Reference model: plain map of room → members.
#[derive(Default)]
struct Model {
    connected: BTreeSet<ConnectionId>,
    rooms: BTreeMap<RoomId, BTreeSet<ConnectionId>>,
}

impl Model {
    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Register(c) => {
                self.connected.insert(c);
            },
            Op::Join(c, r) if self.connected.contains(&c) => {
                self.rooms.entry(room(r)).or_default().insert(c);
            },
            Op::Leave(c, r) => {
                if let Some(members) = self.rooms.get_mut(&room(r)) {
                    members.remove(&c);
                    if members.is_empty() {
                        self.rooms.remove(&room(r));
                    }
                }
            },
            Op::Disconnect(c) => {
                self.connected.remove(&c);
                self.rooms.retain(|_, members| {
                    members.remove(&c);
                    !members.is_empty()
                });
            },
            Op::Join(..) => {},
        }
    }
}

proptest! {
    #[test]
    fn views_never_diverge(ops in prop::collection::vec(op(), 0..64)) {
        let mut lifecycle = Lifecycle::new();
        let mut model = Model::default();

        for op in &ops {
            match *op {
                Op::Register(c) => {
                    let _ = lifecycle.register(c, ConnectionInfo::new(format!("user{c}"), "/"));
                },
                Op::Join(c, r) => {
                    let _ = lifecycle.join_room(c, &room(r), note());
                },
                Op::Leave(c, r) => {
                    let _ = lifecycle.leave_room(c, &room(r), note());
                },
                Op::Disconnect(c) => {
                    let _ = lifecycle.disconnect(c);
                },
            }
            model.apply(op);

            prop_assert!(lifecycle.check_consistency().is_ok(), "diverged after {:?}", op);
        }

        let directory = lifecycle.directory();
        prop_assert_eq!(directory.room_count(), model.rooms.len());
        for (room_id, members) in &model.rooms {
            prop_assert_eq!(&directory.members_of(room_id.as_str()), members);
        }
        for c in &model.connected {
            let expected: BTreeSet<RoomId> = model
                .rooms
                .iter()
                .filter(|(_, m)| m.contains(c))
                .map(|(r, _)| r.clone())
                .collect();
            prop_assert_eq!(lifecycle.registry().rooms_of(*c).unwrap(), &expected);
        }
    }

    #[test]
    fn double_join_is_idempotent(c in 0u64..4, r in 0u8..4) {
        let mut lifecycle = Lifecycle::new();
        lifecycle.register(c, ConnectionInfo::new("x", "/")).unwrap();

        lifecycle.join_room(c, &room(r), note()).unwrap();
        let once = lifecycle.directory().members_of(room(r).as_str());
        lifecycle.join_room(c, &room(r), note()).unwrap();

        prop_assert_eq!(lifecycle.directory().members_of(room(r).as_str()), once);
        prop_assert_eq!(lifecycle.registry().rooms_of(c).unwrap().len(), 1);
    }

    #[test]
    fn room_dispatch_reaches_exactly_the_members(
        members in prop::collection::btree_set(0u64..8, 1..8),
        outsiders in prop::collection::btree_set(8u64..16, 0..8),
    ) {
        let mut lifecycle = Lifecycle::new();
        for &c in members.iter().chain(&outsiders) {
            lifecycle.register(c, ConnectionInfo::new(format!("user{c}"), "/")).unwrap();
        }
        for &c in &members {
            lifecycle.join_room(c, &room(0), note()).unwrap();
        }

        let sender = *members.iter().next().unwrap();
        let dispatch = lifecycle.router().room(&room(0), Some(sender), note());
        prop_assert_eq!(dispatch.recipients, members.iter().copied().collect::<Vec<_>>());

        let global = lifecycle.router().global(sender, note());
        prop_assert_eq!(global.recipients.len(), members.len() + outsiders.len());
        prop_assert!(global.recipients.contains(&sender));
    }
}
