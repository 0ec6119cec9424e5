use common::proto::{code, Command, ProtoError, Status};
use log::debug;
use smallvec::SmallVec;

use crate::registry::Registry;

const RECIPIENTS_SIZE: usize = 8;

type Recipients = SmallVec<[String; RECIPIENTS_SIZE]>;

/** Turn one decoded frame into registry mutations and a set of
status objects enqueued to the right mailboxes.

Rules, per command:
- any command but registration requires the peer address to already
  resolve to a user (420 otherwise, delivered to nobody since there
  is nobody to deliver to);
- room and private messages are all-or-nothing: one unknown name
  anywhere and only the originator hears about it;
- the returned status is for the connection driver, which watches
  for a successful disconnect of its own user.
*/
pub fn dispatch(registry: &Registry, addr: &str, interior: &str) -> Status {
    let command = match Command::decode(interior) {
        Ok(command) => command,
        Err(e) => {
            debug!("dispatch({}): {}: {:?}", addr, e, interior);
            let status = match e {
                ProtoError::BadArgCount => Status::base(code::BAD_ARG_COUNT, "Bad argument count"),
                _ => Status::base(code::BAD_COMMAND, "Bad command"),
            };
            send_to_originator(registry, addr, &status);
            return status;
        }
    };

    let sender = registry.user_by_addr(addr).ok();
    match (command, sender) {
        (Command::Register { username }, _) => do_register(registry, addr, &username),
        (_, None) => Status::base(
            code::NOT_REGISTERED,
            "Not registered address, register a username first.",
        ),
        (Command::Join { room, username }, Some(sender)) => {
            do_join(registry, &sender, &room, &username)
        }
        (Command::RoomMessage { rooms, body }, Some(sender)) => {
            do_room_message(registry, &sender, &rooms, &body)
        }
        (Command::PrivateMessage { users, body }, Some(sender)) => {
            do_private_message(registry, &sender, &users, &body)
        }
        (Command::Leave { room, username }, Some(sender)) => {
            do_leave(registry, &sender, &room, &username)
        }
        (Command::ListRoomUsers { room }, Some(sender)) => {
            do_list_room_users(registry, &sender, &room)
        }
        (Command::ListRooms, Some(sender)) => do_list_rooms(registry, &sender),
        (Command::Disconnect { username }, Some(sender)) => {
            do_disconnect(registry, &sender, &username)
        }
    }
}

fn send_to_originator(registry: &Registry, addr: &str, status: &Status) {
    if let Ok(name) = registry.user_by_addr(addr) {
        registry.enqueue_message(status, &[name]);
    }
}

/// A registration on an already-bound address is answered through
/// the existing session's mailbox; a fresh address gets the status
/// back directly (the driver writes it during the registration
/// phase, before any writer task exists).
fn do_register(registry: &Registry, addr: &str, username: &str) -> Status {
    if registry.has_addr(addr) {
        let status = registry.register(username, addr);
        if let Ok(name) = registry.user_by_addr(addr) {
            registry.enqueue_message(&status, &[name]);
        }
        status
    } else {
        registry.register(username, addr)
    }
}

fn do_join(registry: &Registry, sender: &str, room: &str, username: &str) -> Status {
    let status = registry.join_room(room, username);
    if status.code() == code::SUCCESS {
        // Every current member, the new one included, sees the join.
        let members = registry.list_room_users(room).unwrap_or_default();
        registry.enqueue_message(&status, &members);
    } else {
        registry.enqueue_message(&status, &[String::from(sender)]);
    }
    status
}

fn do_room_message(registry: &Registry, sender: &str, rooms: &[String], body: &str) -> Status {
    for room in rooms {
        if !registry.has_room(room) {
            let status = Status::Message {
                code: code::ROOM_NOT_FOUND,
                message: String::from("Room not found"),
                to_room: true,
                sender: String::from(sender),
                room: room.clone(),
                username: String::new(),
                body: String::from(body),
            };
            registry.enqueue_message(&status, &[String::from(sender)]);
            return status;
        }
    }
    for room in rooms {
        let status = Status::Message {
            code: code::SUCCESS,
            message: String::from("success"),
            to_room: true,
            sender: String::from(sender),
            room: room.clone(),
            username: String::new(),
            body: String::from(body),
        };
        if let Some(members) = registry.list_room_users(room) {
            registry.enqueue_message(&status, &members);
        }
    }
    Status::base(code::SUCCESS, "success")
}

fn do_private_message(registry: &Registry, sender: &str, users: &[String], body: &str) -> Status {
    for username in users {
        if !registry.has_user(username) {
            let status = Status::Message {
                code: code::RECEIVER_NOT_FOUND,
                message: String::from("Message receiver not found"),
                to_room: false,
                sender: String::from(sender),
                room: String::new(),
                username: username.clone(),
                body: String::from(body),
            };
            registry.enqueue_message(&status, &[String::from(sender)]);
            return status;
        }
    }
    // The sender gets a receipt for every delivery, each naming its
    // recipient, unless the sender is among the named recipients.
    // These are not duplicates: a three-recipient send yields three
    // distinct receipts.
    let echo_sender = !users.iter().any(|u| u == sender);
    for username in users {
        let status = Status::Message {
            code: code::SUCCESS,
            message: String::from("success"),
            to_room: false,
            sender: String::from(sender),
            room: String::new(),
            username: username.clone(),
            body: String::from(body),
        };
        registry.enqueue_message(&status, &[username.clone()]);
        if echo_sender {
            registry.enqueue_message(&status, &[String::from(sender)]);
        }
    }
    Status::base(code::SUCCESS, "success")
}

fn do_leave(registry: &Registry, sender: &str, room: &str, username: &str) -> Status {
    let status = registry.leave_room(room, username);
    if status.code() == code::SUCCESS {
        // The remaining members and the leaver all observe the leave.
        let mut recipients: Recipients =
            SmallVec::from_vec(registry.list_room_users(room).unwrap_or_default());
        recipients.push(String::from(username));
        registry.enqueue_message(&status, &recipients);
    } else {
        registry.enqueue_message(&status, &[String::from(sender)]);
    }
    status
}

fn do_list_room_users(registry: &Registry, sender: &str, room: &str) -> Status {
    let status = match registry.list_room_users(room) {
        Some(users) => Status::RoomUsers {
            code: code::SUCCESS,
            message: String::from("success"),
            room: String::from(room),
            users,
        },
        None => Status::RoomUsers {
            code: code::NOT_IN_ROOM,
            message: String::from("Room to list not found"),
            room: String::from(room),
            users: Vec::new(),
        },
    };
    registry.enqueue_message(&status, &[String::from(sender)]);
    status
}

fn do_list_rooms(registry: &Registry, sender: &str) -> Status {
    let status = Status::RoomList {
        code: code::SUCCESS,
        message: String::from("success"),
        rooms: registry.list_rooms(),
    };
    registry.enqueue_message(&status, &[String::from(sender)]);
    status
}

fn do_disconnect(registry: &Registry, sender: &str, username: &str) -> Status {
    let (rooms, status) = registry.disconnect_user(username);
    if status.code() != code::SUCCESS {
        registry.enqueue_message(&status, &[String::from(sender)]);
        return status;
    }
    for room in rooms {
        let note = Status::Disconnect {
            code: code::SUCCESS,
            message: String::from("success"),
            username: String::from(username),
            room: room.clone(),
            addr: None,
        };
        if let Some(members) = registry.list_room_users(&room) {
            registry.enqueue_message(&note, &members);
        }
    }
    // Returned to the driver, which shuts its own tasks down when
    // the disconnected user is its own.
    Status::Disconnect {
        code: code::SUCCESS,
        message: String::from("success"),
        username: String::from(username),
        room: String::new(),
        addr: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::proto::pad_name;

    const ADDR_A: &str = "10.0.0.1:4000";
    const ADDR_B: &str = "10.0.0.2:4001";
    const ADDR_C: &str = "10.0.0.3:4002";

    fn padded(name: &str) -> String {
        pad_name(name).unwrap()
    }

    fn interior(command: &Command) -> String {
        let encoded = command.encode();
        encoded[1..encoded.len() - 1].to_string()
    }

    /// A registry with alice at ADDR_A, bob at ADDR_B.
    fn two_users() -> (Registry, String, String) {
        let registry = Registry::new();
        let alice = padded("alice");
        let bob = padded("bob");
        assert_eq!(registry.register(&alice, ADDR_A).code(), code::SUCCESS);
        assert_eq!(registry.register(&bob, ADDR_B).code(), code::SUCCESS);
        (registry, alice, bob)
    }

    fn join(registry: &Registry, addr: &str, room: &str, user: &str) {
        let status = dispatch(
            registry,
            addr,
            &interior(&Command::Join {
                room: String::from(room),
                username: String::from(user),
            }),
        );
        assert_eq!(status.code(), code::SUCCESS);
    }

    #[test]
    fn create_and_broadcast() {
        let (registry, alice, _bob) = two_users();
        let devs = padded("devs");
        join(&registry, ADDR_A, &devs, &alice);
        let status = dispatch(
            &registry,
            ADDR_A,
            &interior(&Command::RoomMessage {
                rooms: vec![devs.clone()],
                body: String::from("hello"),
            }),
        );
        assert_eq!(status.code(), code::SUCCESS);

        let inbox = registry.take_pending(&alice);
        assert_eq!(inbox.len(), 2);
        match &inbox[0] {
            Status::Join {
                code: c,
                room,
                username,
                is_creation,
                ..
            } => {
                assert_eq!(*c, code::SUCCESS);
                assert_eq!(room, &devs);
                assert_eq!(username, &alice);
                assert!(*is_creation);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        match &inbox[1] {
            Status::Message {
                code: c,
                to_room,
                sender,
                room,
                body,
                ..
            } => {
                assert_eq!(*c, code::SUCCESS);
                assert!(*to_room);
                assert_eq!(sender, &alice);
                assert_eq!(room, &devs);
                assert_eq!(body, "hello");
            }
            other => panic!("unexpected status: {:?}", other),
        }
        // Nobody else was affected.
        assert!(registry.take_pending(&padded("bob")).is_empty());
    }

    #[test]
    fn second_joiner_sees_the_broadcast() {
        let (registry, alice, bob) = two_users();
        let devs = padded("devs");
        join(&registry, ADDR_A, &devs, &alice);
        registry.take_pending(&alice);

        join(&registry, ADDR_B, &devs, &bob);
        for name in [&alice, &bob] {
            let inbox = registry.take_pending(name);
            assert_eq!(inbox.len(), 1, "{} should see bob's join", name.trim_end());
            match &inbox[0] {
                Status::Join {
                    code: c,
                    username,
                    is_creation,
                    ..
                } => {
                    assert_eq!(*c, code::SUCCESS);
                    assert_eq!(username, &bob);
                    assert!(!*is_creation);
                }
                other => panic!("unexpected status: {:?}", other),
            }
        }

        dispatch(
            &registry,
            ADDR_A,
            &interior(&Command::RoomMessage {
                rooms: vec![devs.clone()],
                body: String::from("hi"),
            }),
        );
        for name in [&alice, &bob] {
            let inbox = registry.take_pending(name);
            assert_eq!(inbox.len(), 1);
            assert_eq!(inbox[0].code(), code::SUCCESS);
        }
    }

    #[test]
    fn unknown_room_delivers_only_the_error() {
        let (registry, alice, bob) = two_users();
        let devs = padded("devs");
        let ghost = padded("ghost");
        join(&registry, ADDR_A, &devs, &alice);
        join(&registry, ADDR_B, &devs, &bob);
        registry.take_pending(&alice);
        registry.take_pending(&bob);

        let status = dispatch(
            &registry,
            ADDR_A,
            &interior(&Command::RoomMessage {
                rooms: vec![devs.clone(), ghost.clone()],
                body: String::from("hi"),
            }),
        );
        assert_eq!(status.code(), code::ROOM_NOT_FOUND);

        let inbox = registry.take_pending(&alice);
        assert_eq!(inbox.len(), 1);
        match &inbox[0] {
            Status::Message {
                code: c,
                to_room,
                room,
                ..
            } => {
                assert_eq!(*c, code::ROOM_NOT_FOUND);
                assert!(*to_room);
                assert_eq!(room, &ghost);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        // All-or-nothing: the known room saw nothing either.
        assert!(registry.take_pending(&bob).is_empty());
    }

    #[test]
    fn private_message_echoes_to_the_sender() {
        let (registry, alice, bob) = two_users();
        let status = dispatch(
            &registry,
            ADDR_A,
            &interior(&Command::PrivateMessage {
                users: vec![bob.clone()],
                body: String::from("psst"),
            }),
        );
        assert_eq!(status.code(), code::SUCCESS);

        let inbox = registry.take_pending(&bob);
        assert_eq!(inbox.len(), 1);
        match &inbox[0] {
            Status::Message {
                code: c,
                to_room,
                sender,
                username,
                body,
                ..
            } => {
                assert_eq!(*c, code::SUCCESS);
                assert!(!*to_room);
                assert_eq!(sender, &alice);
                assert_eq!(username, &bob);
                assert_eq!(body, "psst");
            }
            other => panic!("unexpected status: {:?}", other),
        }
        // The sender gets a copy.
        assert_eq!(registry.take_pending(&alice).len(), 1);
    }

    #[test]
    fn private_message_names_the_sender_once_when_self_addressed() {
        let (registry, alice, bob) = two_users();
        dispatch(
            &registry,
            ADDR_A,
            &interior(&Command::PrivateMessage {
                users: vec![alice.clone(), bob.clone()],
                body: String::from("all"),
            }),
        );
        // One per-recipient delivery for alice, no extra echo.
        assert_eq!(registry.take_pending(&alice).len(), 1);
        assert_eq!(registry.take_pending(&bob).len(), 1);
    }

    #[test]
    fn private_message_echoes_one_receipt_per_recipient() {
        let (registry, alice, bob) = two_users();
        let carol = padded("carol");
        registry.register(&carol, ADDR_C);
        dispatch(
            &registry,
            ADDR_A,
            &interior(&Command::PrivateMessage {
                users: vec![bob.clone(), carol.clone()],
                body: String::from("fan out"),
            }),
        );
        assert_eq!(registry.take_pending(&bob).len(), 1);
        assert_eq!(registry.take_pending(&carol).len(), 1);
        // The sender's receipts are per-delivery, not a single echo:
        // one for bob, one for carol, in request order.
        let receipts = registry.take_pending(&alice);
        assert_eq!(receipts.len(), 2);
        let named: Vec<&String> = receipts
            .iter()
            .map(|status| match status {
                Status::Message { username, .. } => username,
                other => panic!("unexpected status: {:?}", other),
            })
            .collect();
        assert_eq!(named, vec![&bob, &carol]);
    }

    #[test]
    fn unknown_private_recipient_delivers_only_the_error() {
        let (registry, alice, bob) = two_users();
        let nobody = padded("nobody");
        let status = dispatch(
            &registry,
            ADDR_A,
            &interior(&Command::PrivateMessage {
                users: vec![bob.clone(), nobody.clone()],
                body: String::from("hi"),
            }),
        );
        assert_eq!(status.code(), code::RECEIVER_NOT_FOUND);

        let inbox = registry.take_pending(&alice);
        assert_eq!(inbox.len(), 1);
        match &inbox[0] {
            Status::Message {
                code: c, username, ..
            } => {
                assert_eq!(*c, code::RECEIVER_NOT_FOUND);
                assert_eq!(username, &nobody);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert!(registry.take_pending(&bob).is_empty());
    }

    #[test]
    fn leave_notifies_the_room_and_the_leaver() {
        let (registry, alice, bob) = two_users();
        let devs = padded("devs");
        join(&registry, ADDR_A, &devs, &alice);
        join(&registry, ADDR_B, &devs, &bob);
        registry.take_pending(&alice);
        registry.take_pending(&bob);

        let status = dispatch(
            &registry,
            ADDR_A,
            &interior(&Command::Leave {
                room: devs.clone(),
                username: alice.clone(),
            }),
        );
        assert_eq!(status.code(), code::SUCCESS);
        for name in [&alice, &bob] {
            let inbox = registry.take_pending(name);
            assert_eq!(inbox.len(), 1, "{} should see the leave", name.trim_end());
            match &inbox[0] {
                Status::Leave {
                    code: c, username, ..
                } => {
                    assert_eq!(*c, code::SUCCESS);
                    assert_eq!(username, &alice);
                }
                other => panic!("unexpected status: {:?}", other),
            }
        }
        // Leaving again: 451 to the originator only.
        let status = dispatch(
            &registry,
            ADDR_A,
            &interior(&Command::Leave {
                room: devs.clone(),
                username: alice.clone(),
            }),
        );
        assert_eq!(status.code(), code::NOT_IN_ROOM);
        assert_eq!(registry.take_pending(&alice).len(), 1);
        assert!(registry.take_pending(&bob).is_empty());
    }

    #[test]
    fn disconnect_fans_out_per_room() {
        let (registry, alice, bob) = two_users();
        let carol = padded("carol");
        registry.register(&carol, ADDR_C);
        let devs = padded("devs");
        let ops = padded("ops");
        join(&registry, ADDR_B, &devs, &bob);
        join(&registry, ADDR_B, &ops, &bob);
        join(&registry, ADDR_A, &devs, &alice);
        join(&registry, ADDR_C, &ops, &carol);
        registry.take_pending(&alice);
        registry.take_pending(&carol);

        let status = dispatch(
            &registry,
            ADDR_B,
            &interior(&Command::Disconnect {
                username: bob.clone(),
            }),
        );
        match &status {
            Status::Disconnect {
                code: c,
                username,
                room,
                ..
            } => {
                assert_eq!(*c, code::SUCCESS);
                assert_eq!(username, &bob);
                assert!(room.is_empty());
            }
            other => panic!("unexpected status: {:?}", other),
        }

        let inbox = registry.take_pending(&alice);
        assert_eq!(inbox.len(), 1);
        match &inbox[0] {
            Status::Disconnect {
                username, room, ..
            } => {
                assert_eq!(username, &bob);
                assert_eq!(room, &devs);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        let inbox = registry.take_pending(&carol);
        assert_eq!(inbox.len(), 1);
        match &inbox[0] {
            Status::Disconnect { room, .. } => assert_eq!(room, &ops),
            other => panic!("unexpected status: {:?}", other),
        }

        assert!(!registry.has_user(&bob));
        // A later private message to bob fails for the sender only.
        let status = dispatch(
            &registry,
            ADDR_A,
            &interior(&Command::PrivateMessage {
                users: vec![bob.clone()],
                body: String::from("you there?"),
            }),
        );
        assert_eq!(status.code(), code::RECEIVER_NOT_FOUND);

        // A second disconnect of the same user reports 461.
        let (_, status) = registry.disconnect_user(&bob);
        assert_eq!(status.code(), code::DISCONNECT_NO_USER);
    }

    #[test]
    fn duplicate_register_on_the_same_address() {
        let (registry, alice, _bob) = two_users();
        let status = dispatch(
            &registry,
            ADDR_A,
            &interior(&Command::Register {
                username: padded("alicia"),
            }),
        );
        assert_eq!(status.code(), code::ADDR_TAKEN);
        // The 401 arrives through the existing session's mailbox.
        let inbox = registry.take_pending(&alice);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].code(), code::ADDR_TAKEN);
        assert!(!registry.has_user(&padded("alicia")));
    }

    #[test]
    fn unregistered_addresses_get_420_and_mutate_nothing() {
        let (registry, alice, _bob) = two_users();
        let devs = padded("devs");
        let status = dispatch(
            &registry,
            "172.16.0.9:5000",
            &interior(&Command::Join {
                room: devs.clone(),
                username: alice.clone(),
            }),
        );
        assert_eq!(status.code(), code::NOT_REGISTERED);
        assert!(!registry.has_room(&devs));
        assert!(registry.take_pending(&alice).is_empty());
    }

    #[test]
    fn bad_frames_answer_400_and_410() {
        let (registry, alice, _bob) = two_users();
        let status = dispatch(&registry, ADDR_A, "99999whatever");
        assert_eq!(status.code(), code::BAD_COMMAND);
        let inbox = registry.take_pending(&alice);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0], Status::base(code::BAD_COMMAND, "Bad command"));

        // Declares two rooms, carries one.
        let short = format!("0000302{}", padded("devs"));
        let status = dispatch(&registry, ADDR_A, &short);
        assert_eq!(status.code(), code::BAD_ARG_COUNT);
        assert_eq!(registry.take_pending(&alice).len(), 1);
        // No side effects.
        assert!(!registry.has_room(&padded("devs")));
    }

    #[test]
    fn listing_rooms_and_members() {
        let (registry, alice, bob) = two_users();
        let devs = padded("devs");
        let ops = padded("ops");
        join(&registry, ADDR_A, &devs, &alice);
        join(&registry, ADDR_B, &ops, &bob);
        registry.take_pending(&alice);
        registry.take_pending(&bob);

        let status = dispatch(&registry, ADDR_A, &interior(&Command::ListRooms));
        match &status {
            Status::RoomList { code: c, rooms, .. } => {
                assert_eq!(*c, code::SUCCESS);
                assert_eq!(rooms, &vec![devs.clone(), ops.clone()]);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(registry.take_pending(&alice).len(), 1);

        let status = dispatch(
            &registry,
            ADDR_B,
            &interior(&Command::ListRoomUsers { room: devs.clone() }),
        );
        match &status {
            Status::RoomUsers {
                code: c,
                room,
                users,
                ..
            } => {
                assert_eq!(*c, code::SUCCESS);
                assert_eq!(room, &devs);
                assert_eq!(users, &vec![alice.clone()]);
            }
            other => panic!("unexpected status: {:?}", other),
        }

        let status = dispatch(
            &registry,
            ADDR_B,
            &interior(&Command::ListRoomUsers {
                room: padded("ghost"),
            }),
        );
        match &status {
            Status::RoomUsers { code: c, users, .. } => {
                assert_eq!(*c, code::NOT_IN_ROOM);
                assert!(users.is_empty());
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }
}
