use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::sync::{Arc, Mutex};

use log::debug;

use common::proto::{code, valid_name, Status};

use crate::mailbox::Mailbox;

/** Raised when an address that should be bound to a user is not.

Two threads of one connection can both observe a peer reset; the
first one to clean up removes the connection record, and the loser
sees this error and silently winds down.
*/
#[derive(Debug)]
pub struct AddrError;

impl Display for AddrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "address not present in the connection table")
    }
}

impl std::error::Error for AddrError {}

/// The flushing side of a mailbox found its user already gone.
#[derive(Debug)]
pub struct UserDisconnected;

impl Display for UserDisconnected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user has disconnected")
    }
}

impl std::error::Error for UserDisconnected {}

/** One registered user. Owned by the registry; the writer task of
the owning connection holds a shared reference for the duration of
the session so it can block on the mailbox with no registry lock
held. The TCP stream itself lives in the connection driver, never
here.
*/
pub struct Session {
    name: String,
    addr: String,
    mailbox: Mailbox,
}

impl Session {
    fn new(name: &str, addr: &str) -> Session {
        Session {
            name: String::from(name),
            addr: String::from(addr),
            mailbox: Mailbox::new(),
        }
    }
}

struct Room {
    name: String,
    creator: String,
    members: BTreeSet<String>,
}

impl Room {
    fn new(name: &str, creator: &str) -> Room {
        let mut members = BTreeSet::new();
        members.insert(String::from(creator));
        Room {
            name: String::from(name),
            creator: String::from(creator),
            members,
        }
    }

    /// Remove a member; false if the user was not in this room.
    fn leave(&mut self, username: &str) -> bool {
        self.members.remove(username)
    }
}

#[derive(Default)]
struct Tables {
    users: HashMap<String, Arc<Session>>,
    rooms: HashMap<String, Room>,
    conns: HashMap<String, String>,
}

/** The shared state of the server: users, rooms, and the mapping
from peer address to username, all behind a single mutex.

Invariants: a name is in `users` exactly when one address in `conns`
maps to it, and every member name of every room is present in
`users`. Rooms persist when emptied. All mutation happens under the
mutex; the only lock ever taken while it is held is a mailbox lock
(registry-mutex before mailbox-mutex, never the reverse).
*/
pub struct Registry {
    tables: Mutex<Tables>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            tables: Mutex::new(Tables::default()),
        }
    }

    /** Register `username` for the connection at `addr`. 403 when
    the name is not a valid wire name, 401 when the address already
    has an identity, 402 when the name is taken.
    */
    pub fn register(&self, username: &str, addr: &str) -> Status {
        let mut tables = self.tables.lock().unwrap();
        if !valid_name(username) {
            return Status::Registration {
                code: code::BAD_NAME,
                message: String::from("Invalid username format"),
                username: String::from(username),
            };
        }
        if tables.conns.contains_key(addr) {
            return Status::Registration {
                code: code::ADDR_TAKEN,
                message: String::from("Duplicated registration"),
                username: String::from(username),
            };
        }
        if tables.users.contains_key(username) {
            return Status::Registration {
                code: code::NAME_TAKEN,
                message: String::from("Username existed"),
                username: String::from(username),
            };
        }
        tables
            .users
            .insert(String::from(username), Arc::new(Session::new(username, addr)));
        tables.conns.insert(String::from(addr), String::from(username));
        debug!(
            "register: \"{}\" at {} ({} users)",
            username.trim_end(),
            addr,
            tables.users.len()
        );
        Status::Registration {
            code: code::SUCCESS,
            message: String::from("success"),
            username: String::from(username),
        }
    }

    /** Join `username` to `room_name`, creating the room when it
    does not exist. The creating join is marked and makes the user
    both creator and sole member.
    */
    pub fn join_room(&self, room_name: &str, username: &str) -> Status {
        let mut tables = self.tables.lock().unwrap();
        if !tables.users.contains_key(username) {
            return Status::Join {
                code: code::USER_NOT_FOUND,
                message: String::from("User requested not found"),
                room: String::from(room_name),
                username: String::from(username),
                is_creation: false,
            };
        }
        if let Some(room) = tables.rooms.get_mut(room_name) {
            if room.members.contains(username) {
                return Status::Join {
                    code: code::DUPLICATE_JOIN,
                    message: String::from("Duplicated joining"),
                    room: String::from(room_name),
                    username: String::from(username),
                    is_creation: false,
                };
            }
            room.members.insert(String::from(username));
            return Status::Join {
                code: code::SUCCESS,
                message: String::from("success"),
                room: String::from(room_name),
                username: String::from(username),
                is_creation: false,
            };
        }
        if !valid_name(room_name) {
            return Status::Join {
                code: code::BAD_NAME,
                message: String::from("Invalid room name format"),
                room: String::from(room_name),
                username: String::from(username),
                is_creation: false,
            };
        }
        let room = Room::new(room_name, username);
        debug!(
            "join_room: \"{}\" created \"{}\"",
            room.creator.trim_end(),
            room.name.trim_end()
        );
        tables.rooms.insert(String::from(room_name), room);
        Status::Join {
            code: code::SUCCESS,
            message: String::from("success"),
            room: String::from(room_name),
            username: String::from(username),
            is_creation: true,
        }
    }

    /// Remove `username` from `room_name`. The room is kept even
    /// when this empties it.
    pub fn leave_room(&self, room_name: &str, username: &str) -> Status {
        let mut tables = self.tables.lock().unwrap();
        if !tables.users.contains_key(username) {
            return Status::base(code::USER_NOT_FOUND, "User not found");
        }
        match tables.rooms.get_mut(room_name) {
            None => Status::Leave {
                code: code::LEAVE_NO_ROOM,
                message: String::from("Room to leave not found"),
                room: String::from(room_name),
                username: String::from(username),
            },
            Some(room) => {
                if room.leave(username) {
                    Status::Leave {
                        code: code::SUCCESS,
                        message: String::from("success"),
                        room: String::from(room_name),
                        username: String::from(username),
                    }
                } else {
                    Status::Leave {
                        code: code::NOT_IN_ROOM,
                        message: String::from("User not found in room to leave"),
                        room: String::from(room_name),
                        username: String::from(username),
                    }
                }
            }
        }
    }

    /** Remove `username` from every room, fire the mailbox latch so
    the blocked writer wakes, and drop the session. Returns the names
    of the rooms that held the user, for fan-out. The connection
    record is *not* touched here; [`clear_conn`] removes it.

    [`clear_conn`]: Registry::clear_conn
    */
    pub fn disconnect_user(&self, username: &str) -> (Vec<String>, Status) {
        let mut tables = self.tables.lock().unwrap();
        if !tables.users.contains_key(username) {
            return (
                Vec::new(),
                Status::Disconnect {
                    code: code::DISCONNECT_NO_USER,
                    message: String::from("Disconnect user not found"),
                    username: String::from(username),
                    room: String::new(),
                    addr: None,
                },
            );
        }
        let mut to_notify: Vec<String> = Vec::new();
        for room in tables.rooms.values_mut() {
            if room.leave(username) {
                to_notify.push(room.name.clone());
            }
        }
        to_notify.sort();
        if let Some(session) = tables.users.remove(username) {
            session.mailbox.release_on_disconnect();
            debug!(
                "disconnect_user: \"{}\" at {} removed from {} room(s)",
                session.name.trim_end(),
                session.addr,
                to_notify.len()
            );
        }
        (to_notify, Status::base(code::SUCCESS, "success"))
    }

    /// Drop the connection record for `addr`. 462 signals that a
    /// racing thread has already cleared it.
    pub fn clear_conn(&self, addr: &str) -> Status {
        let mut tables = self.tables.lock().unwrap();
        if tables.conns.remove(addr).is_none() {
            Status::base(code::DISCONNECT_NO_ADDR, "Disconnect cannot find address")
        } else {
            Status::base(code::SUCCESS, "success")
        }
    }

    /** Push a copy of `status` onto the mailbox of every recipient
    still present in `users`; missing recipients are silently
    skipped. Recipients are resolved under the registry mutex, which
    is released before any mailbox lock is taken.
    */
    pub fn enqueue_message(&self, status: &Status, recipients: &[String]) {
        let sessions: Vec<Arc<Session>> = {
            let tables = self.tables.lock().unwrap();
            recipients
                .iter()
                .filter_map(|name| tables.users.get(name).cloned())
                .collect()
        };
        for session in sessions {
            session.mailbox.push(status.clone());
        }
    }

    /** Resolve `addr` to its user and block on that user's mailbox.
    Returns the waiting batch, or `None` once the user's disconnect
    latch fires. `UserDisconnected` when the address is no longer
    bound at all.
    */
    pub fn flush_message_queue(&self, addr: &str) -> Result<Option<Vec<Status>>, UserDisconnected> {
        let session = {
            let tables = self.tables.lock().unwrap();
            let username = tables.conns.get(addr).ok_or(UserDisconnected)?;
            tables.users.get(username).cloned().ok_or(UserDisconnected)?
        };
        Ok(session.mailbox.pop_all())
    }

    pub fn has_room(&self, room_name: &str) -> bool {
        self.tables.lock().unwrap().rooms.contains_key(room_name)
    }

    pub fn has_user(&self, username: &str) -> bool {
        self.tables.lock().unwrap().users.contains_key(username)
    }

    pub fn has_addr(&self, addr: &str) -> bool {
        self.tables.lock().unwrap().conns.contains_key(addr)
    }

    /// The username bound to `addr`. `AddrError` means another
    /// thread already tore this connection down.
    pub fn user_by_addr(&self, addr: &str) -> Result<String, AddrError> {
        let tables = self.tables.lock().unwrap();
        tables.conns.get(addr).cloned().ok_or(AddrError)
    }

    /// Member names of `room_name`, or `None` when no such room.
    pub fn list_room_users(&self, room_name: &str) -> Option<Vec<String>> {
        let tables = self.tables.lock().unwrap();
        tables
            .rooms
            .get(room_name)
            .map(|room| room.members.iter().cloned().collect())
    }

    pub fn list_rooms(&self) -> Vec<String> {
        let tables = self.tables.lock().unwrap();
        let mut rooms: Vec<String> = tables.rooms.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Who created `room_name`, for diagnostics. Test-only.
    #[cfg(test)]
    pub fn room_creator(&self, room_name: &str) -> Option<String> {
        let tables = self.tables.lock().unwrap();
        tables.rooms.get(room_name).map(|room| room.creator.clone())
    }

    /// Drain a user's mailbox without blocking. Test-only.
    #[cfg(test)]
    pub fn take_pending(&self, username: &str) -> Vec<Status> {
        let session = {
            let tables = self.tables.lock().unwrap();
            tables.users.get(username).cloned()
        };
        match session {
            Some(session) => session.mailbox.drain_now(),
            None => Vec::new(),
        }
    }

    /// Check the cross-map invariants. Test-only.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        let tables = self.tables.lock().unwrap();
        assert_eq!(tables.users.len(), tables.conns.len());
        for (addr, username) in tables.conns.iter() {
            let session = tables
                .users
                .get(username)
                .unwrap_or_else(|| panic!("conns entry {} -> {} has no user", addr, username));
            assert_eq!(&session.addr, addr);
            assert_eq!(&session.name, username);
        }
        for room in tables.rooms.values() {
            for member in room.members.iter() {
                assert!(
                    tables.users.contains_key(member),
                    "room {} holds missing user {}",
                    room.name,
                    member
                );
            }
        }
    }
}
