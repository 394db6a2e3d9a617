//! Fuzz target for the membership lifecycle
//!
//! Random register/join/leave/disconnect sequences over a handful of
//! connections and rooms.
//!
//! # Invariants
//!
//! - Registry and directory agree after every operation
//! - No room is retained with zero members
//! - Room fan-out only ever names registered members of that room

#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use roomcast_core::{ConnectionInfo, Lifecycle};
use roomcast_proto::{Frame, FrameHeader, Opcode, RoomId};

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Register { connection: u8 },
    Join { connection: u8, room: u8 },
    Leave { connection: u8, room: u8 },
    Disconnect { connection: u8 },
}

fn room(index: u8) -> RoomId {
    RoomId::new(format!("room-{}", index % 4))
}

fn frame() -> Frame {
    Frame::new(FrameHeader::new(Opcode::RoomMessage), Bytes::from_static(b"x"))
}

fuzz_target!(|ops: Vec<Op>| {
    let mut lifecycle = Lifecycle::new();

    for op in ops {
        match op {
            Op::Register { connection } => {
                let id = u64::from(connection % 8);
                let _ = lifecycle.register(id, ConnectionInfo::new(format!("user-{id}"), "/"));
            },
            Op::Join { connection, room: index } => {
                let id = u64::from(connection % 8);
                let registered = lifecycle.registry().contains(id);
                let result = lifecycle.join_room(id, &room(index), frame());
                assert_eq!(result.is_ok(), registered);
                if let Ok(dispatch) = result {
                    assert!(dispatch.recipients.contains(&id));
                }
            },
            Op::Leave { connection, room: index } => {
                let id = u64::from(connection % 8);
                let room_id = room(index);
                let was_member = lifecycle.directory().is_member(room_id.as_str(), id);
                let dispatch = lifecycle.leave_room(id, &room_id, frame());
                assert_eq!(dispatch.is_some(), was_member);
                assert!(!lifecycle.directory().is_member(room_id.as_str(), id));
            },
            Op::Disconnect { connection } => {
                let id = u64::from(connection % 8);
                lifecycle.disconnect(id);
                assert!(!lifecycle.registry().contains(id));
            },
        }

        lifecycle.check_consistency().expect("registry and directory diverged");

        for (room_id, members) in lifecycle.directory().iter() {
            assert!(!members.is_empty(), "empty room {room_id} retained");
            let dispatch = lifecycle.router().room(room_id, None, frame());
            for id in &dispatch.recipients {
                assert!(members.contains(id));
                assert!(lifecycle.registry().contains(*id));
            }
        }
    }
});
