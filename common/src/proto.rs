/** Wire protocol for the chat service.

Every request and every response travels inside a `$` … `$` frame.
Frame interiors are plain text; the first five characters of a
request interior are the command code, and a response interior is
`<code3><cmd5><variant fields>`. Names (usernames and room names)
are always space-padded to exactly [`NAME_LEN`] characters on the
wire and may not contain any of the three reserved bytes.

The [`Command`] enum is the decoded form of a request; the
[`Status`] enum is the decoded form of a response. Both sides of
the connection share this module: the server decodes commands and
encodes statuses, the client does the reverse.
*/

use std::fmt::Display;

/// Fixed width of every name field on the wire.
pub const NAME_LEN: usize = 20;

/// Bytes that may never appear inside a name.
pub const RESERVED: &[char] = &['$', '#', '&'];

pub const CMD_REGISTER: &str = "00001";
pub const CMD_JOIN: &str = "00002";
pub const CMD_ROOM_MSG: &str = "00003";
pub const CMD_PRIV_MSG: &str = "00004";
pub const CMD_LEAVE: &str = "00005";
pub const CMD_ROOM_USERS: &str = "00006";
pub const CMD_LIST_ROOMS: &str = "00007";
pub const CMD_DISCONNECT: &str = "00010";

/// Status codes the server emits. 411 is reserved: clients know how
/// to print it, but nothing currently produces it.
pub mod code {
  pub const SUCCESS: u16 = 200;
  pub const BAD_COMMAND: u16 = 400;
  pub const ADDR_TAKEN: u16 = 401;
  pub const NAME_TAKEN: u16 = 402;
  pub const BAD_NAME: u16 = 403;
  pub const BAD_ARG_COUNT: u16 = 410;
  pub const RESERVED: u16 = 411;
  pub const NOT_REGISTERED: u16 = 420;
  pub const LEAVE_NO_ROOM: u16 = 450;
  pub const NOT_IN_ROOM: u16 = 451;
  pub const DISCONNECT_NO_USER: u16 = 461;
  pub const DISCONNECT_NO_ADDR: u16 = 462;
  pub const RECEIVER_NOT_FOUND: u16 = 496;
  pub const ROOM_NOT_FOUND: u16 = 497;
  pub const DUPLICATE_JOIN: u16 = 498;
  pub const USER_NOT_FOUND: u16 = 499;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtoError {
  /// The five-character command code is not one we know.
  BadCommand,
  /// A declared count does not match the fields actually present.
  BadArgCount,
  /// A response that cannot be decoded back into a `Status`.
  Malformed,
}

impl Display for ProtoError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ProtoError::BadCommand => write!(f, "unrecognised command code"),
      ProtoError::BadArgCount => write!(f, "argument count mismatch"),
      ProtoError::Malformed => write!(f, "malformed status"),
    }
  }
}

impl std::error::Error for ProtoError {}

/** Extract every complete `$…$` frame interior from one read's worth
of text. A frame that is not terminated, or bytes outside any frame,
are discarded; nothing is carried over to the next read. Interiors
are non-empty, so `$$` does not form a frame.
*/
pub fn extract_frames(chunk: &str) -> Vec<&str> {
  let bytes = chunk.as_bytes();
  let mut frames = Vec::new();
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] != b'$' {
      i += 1;
      continue;
    }
    let mut j = i + 1;
    while j < bytes.len() && bytes[j] != b'$' {
      j += 1;
    }
    if j >= bytes.len() {
      break;
    }
    if j == i + 1 {
      // "$$": the first delimiter dangles; rescan from the second.
      i = j;
      continue;
    }
    frames.push(&chunk[i + 1..j]);
    i = j + 1;
  }
  frames
}

/** Space-pad `name` to the fixed wire width. Returns `None` when the
name is too long or contains a reserved byte.
*/
pub fn pad_name(name: &str) -> Option<String> {
  let len = name.chars().count();
  if len > NAME_LEN || name.contains(RESERVED) {
    return None;
  }
  let mut padded = String::from(name);
  for _ in len..NAME_LEN {
    padded.push(' ');
  }
  Some(padded)
}

/// A wire-ready name: exactly [`NAME_LEN`] characters, none reserved.
pub fn valid_name(name: &str) -> bool {
  name.chars().count() == NAME_LEN && !name.contains(RESERVED)
}

/// Split after `n` characters (not bytes; names may be multibyte).
fn split_at_chars(s: &str, n: usize) -> Option<(&str, &str)> {
  let mut iter = s.char_indices();
  for _ in 0..n {
    iter.next()?;
  }
  let idx = iter.next().map(|(i, _)| i).unwrap_or(s.len());
  Some(s.split_at(idx))
}

/** A decoded client request.

The interior layouts are fixed-width where a field is a name and
structural (`#`-separated, `&`-joined) where it is variable-length.
Room-message and private-message requests declare how many names
follow as a two-digit zero-padded count.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
  Register { username: String },
  Join { room: String, username: String },
  RoomMessage { rooms: Vec<String>, body: String },
  PrivateMessage { users: Vec<String>, body: String },
  Leave { room: String, username: String },
  ListRoomUsers { room: String },
  ListRooms,
  Disconnect { username: String },
}

impl Command {
  /** Decode one frame interior. `BadCommand` when the code is
  unknown; `BadArgCount` when a declared count cannot be satisfied.
  */
  pub fn decode(interior: &str) -> Result<Command, ProtoError> {
    let (cmd, args) = split_at_chars(interior, 5).ok_or(ProtoError::BadCommand)?;
    match cmd {
      CMD_REGISTER => Ok(Command::Register {
        username: args.to_string(),
      }),
      CMD_JOIN => {
        let (room, username) = split_name_pair(args);
        Ok(Command::Join { room, username })
      }
      CMD_ROOM_MSG => {
        let (count, rest) = split_at_chars(args, 2).ok_or(ProtoError::BadArgCount)?;
        let n: usize = count.parse().map_err(|_| ProtoError::BadArgCount)?;
        let mut rooms = Vec::with_capacity(n);
        let mut rest = rest;
        for _ in 0..n {
          let (room, tail) = split_at_chars(rest, NAME_LEN).ok_or(ProtoError::BadArgCount)?;
          rooms.push(room.to_string());
          rest = tail;
        }
        Ok(Command::RoomMessage {
          rooms,
          body: rest.to_string(),
        })
      }
      CMD_PRIV_MSG => {
        let (count, rest) = split_at_chars(args, 2).ok_or(ProtoError::BadArgCount)?;
        let n: usize = count.parse().map_err(|_| ProtoError::BadArgCount)?;
        // The recipient list ends at the first '#'; everything after
        // it is payload, which may itself contain '#' or '&'.
        let (names, body) = rest.split_once('#').ok_or(ProtoError::BadArgCount)?;
        let users: Vec<String> = names.split('&').map(str::to_string).collect();
        if users.len() != n {
          return Err(ProtoError::BadArgCount);
        }
        Ok(Command::PrivateMessage {
          users,
          body: body.to_string(),
        })
      }
      CMD_LEAVE => {
        let (room, username) = split_name_pair(args);
        Ok(Command::Leave { room, username })
      }
      CMD_ROOM_USERS => Ok(Command::ListRoomUsers {
        room: args.to_string(),
      }),
      CMD_LIST_ROOMS => Ok(Command::ListRooms),
      CMD_DISCONNECT => Ok(Command::Disconnect {
        username: args.to_string(),
      }),
      _ => Err(ProtoError::BadCommand),
    }
  }

  /// Encode as a complete `$…$` frame.
  pub fn encode(&self) -> String {
    match self {
      Command::Register { username } => format!("${}{}$", CMD_REGISTER, username),
      Command::Join { room, username } => format!("${}{}{}$", CMD_JOIN, room, username),
      Command::RoomMessage { rooms, body } => format!(
        "${}{:02}{}{}$",
        CMD_ROOM_MSG,
        rooms.len(),
        rooms.concat(),
        body
      ),
      Command::PrivateMessage { users, body } => format!(
        "${}{:02}{}#{}$",
        CMD_PRIV_MSG,
        users.len(),
        users.join("&"),
        body
      ),
      Command::Leave { room, username } => format!("${}{}{}$", CMD_LEAVE, room, username),
      Command::ListRoomUsers { room } => format!("${}{}$", CMD_ROOM_USERS, room),
      Command::ListRooms => format!("${}$", CMD_LIST_ROOMS),
      Command::Disconnect { username } => format!("${}{}$", CMD_DISCONNECT, username),
    }
  }

  pub fn to_bytes(&self) -> Vec<u8> {
    self.encode().into_bytes()
  }
}

/// A fixed-width name followed by whatever is left. Short input
/// degrades to an over-long first field and an empty second, which
/// the registry then rejects with the usual name-format error.
fn split_name_pair(args: &str) -> (String, String) {
  match split_at_chars(args, NAME_LEN) {
    Some((first, rest)) => (first.to_string(), rest.to_string()),
    None => (args.to_string(), String::new()),
  }
}

/** A server response.

Every variant encodes to `$<code3><cmd5><fields>$` except `Base`,
which carries no command code and is used for generic errors (400,
410, 420, 462, 499 on leave, …). Field layouts are pinned; decoding
checks the exact `#`-separated field count and rejects anything
else, which lets payload bytes stay unconstrained.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
  Base {
    code: u16,
    message: String,
  },
  Registration {
    code: u16,
    message: String,
    username: String,
  },
  Join {
    code: u16,
    message: String,
    room: String,
    username: String,
    is_creation: bool,
  },
  /** One delivered chat message. `to_room` selects the room form
  (command code 00003, `room` set) or the private form (00004,
  `username` set); the unused field is left empty.
  */
  Message {
    code: u16,
    message: String,
    to_room: bool,
    sender: String,
    room: String,
    username: String,
    body: String,
  },
  Disconnect {
    code: u16,
    message: String,
    username: String,
    room: String,
    addr: Option<String>,
  },
  Leave {
    code: u16,
    message: String,
    room: String,
    username: String,
  },
  RoomUsers {
    code: u16,
    message: String,
    room: String,
    users: Vec<String>,
  },
  RoomList {
    code: u16,
    message: String,
    rooms: Vec<String>,
  },
}

impl Status {
  pub fn base(code: u16, message: &str) -> Status {
    Status::Base {
      code,
      message: String::from(message),
    }
  }

  pub fn code(&self) -> u16 {
    match self {
      Status::Base { code, .. }
      | Status::Registration { code, .. }
      | Status::Join { code, .. }
      | Status::Message { code, .. }
      | Status::Disconnect { code, .. }
      | Status::Leave { code, .. }
      | Status::RoomUsers { code, .. }
      | Status::RoomList { code, .. } => *code,
    }
  }

  /// Encode as a complete `$…$` frame.
  pub fn encode(&self) -> String {
    match self {
      Status::Base { code, message } => format!("${:03}{}$", code, message),
      Status::Registration {
        code,
        message,
        username,
      } => format!("${:03}{}{}#{}$", code, CMD_REGISTER, username, message),
      Status::Join {
        code,
        message,
        room,
        username,
        is_creation,
      } => format!(
        "${:03}{}{}{}{}#{}$",
        code,
        CMD_JOIN,
        if *is_creation { '1' } else { '0' },
        room,
        username,
        message
      ),
      Status::Message {
        code,
        message,
        to_room,
        sender,
        room,
        username,
        body,
      } => {
        if *to_room {
          format!(
            "${:03}{}1{}#{}#{}#{}$",
            code, CMD_ROOM_MSG, sender, room, body, message
          )
        } else {
          format!(
            "${:03}{}0{}#{}#{}#{}$",
            code, CMD_PRIV_MSG, sender, username, body, message
          )
        }
      }
      Status::Disconnect {
        code,
        message,
        username,
        room,
        addr,
      } => format!(
        "${:03}{}{}#{}#{}#{}$",
        code,
        CMD_DISCONNECT,
        username,
        addr.as_deref().unwrap_or(""),
        room,
        message
      ),
      Status::Leave {
        code,
        message,
        room,
        username,
      } => format!("${:03}{}{}{}#{}$", code, CMD_LEAVE, room, username, message),
      Status::RoomUsers {
        code,
        message,
        room,
        users,
      } => format!(
        "${:03}{}{}{}#{}$",
        code,
        CMD_ROOM_USERS,
        room,
        users.join("&"),
        message
      ),
      Status::RoomList {
        code,
        message,
        rooms,
      } => format!("${:03}{}{}#{}$", code, CMD_LIST_ROOMS, rooms.join("&"), message),
    }
  }

  pub fn to_bytes(&self) -> Vec<u8> {
    self.encode().into_bytes()
  }

  /** Decode one frame interior. An interior whose command-code slot
  is not a known code falls back to the `Base` form; anything that
  fails a fixed-width cut or an exact field-count check is
  `Malformed` and should be discarded by the receiver.
  */
  pub fn decode(interior: &str) -> Result<Status, ProtoError> {
    let (code_str, rest) = split_at_chars(interior, 3).ok_or(ProtoError::Malformed)?;
    let code: u16 = code_str.parse().map_err(|_| ProtoError::Malformed)?;
    let (cmd, args) = match split_at_chars(rest, 5) {
      Some(x) => x,
      None => {
        return Ok(Status::Base {
          code,
          message: rest.to_string(),
        });
      }
    };
    match cmd {
      CMD_REGISTER => {
        let (username, message) = split_two(args)?;
        Ok(Status::Registration {
          code,
          message,
          username,
        })
      }
      CMD_JOIN => {
        let (flag, rest) = split_at_chars(args, 1).ok_or(ProtoError::Malformed)?;
        let is_creation = match flag {
          "1" => true,
          "0" => false,
          _ => return Err(ProtoError::Malformed),
        };
        let (room, rest) = split_at_chars(rest, NAME_LEN).ok_or(ProtoError::Malformed)?;
        let (username, message) = split_two(rest)?;
        Ok(Status::Join {
          code,
          message,
          room: room.to_string(),
          username,
          is_creation,
        })
      }
      CMD_ROOM_MSG | CMD_PRIV_MSG => {
        let (flag, rest) = split_at_chars(args, 1).ok_or(ProtoError::Malformed)?;
        let to_room = cmd == CMD_ROOM_MSG;
        if (to_room && flag != "1") || (!to_room && flag != "0") {
          return Err(ProtoError::Malformed);
        }
        let fields: Vec<&str> = rest.split('#').collect();
        if fields.len() != 4 {
          return Err(ProtoError::Malformed);
        }
        Ok(Status::Message {
          code,
          message: fields[3].to_string(),
          to_room,
          sender: fields[0].to_string(),
          room: if to_room { fields[1].to_string() } else { String::new() },
          username: if to_room { String::new() } else { fields[1].to_string() },
          body: fields[2].to_string(),
        })
      }
      CMD_DISCONNECT => {
        let fields: Vec<&str> = args.split('#').collect();
        if fields.len() != 4 {
          return Err(ProtoError::Malformed);
        }
        Ok(Status::Disconnect {
          code,
          message: fields[3].to_string(),
          username: fields[0].to_string(),
          room: fields[2].to_string(),
          addr: if fields[1].is_empty() {
            None
          } else {
            Some(fields[1].to_string())
          },
        })
      }
      CMD_LEAVE => {
        let (room, rest) = split_at_chars(args, NAME_LEN).ok_or(ProtoError::Malformed)?;
        let (username, message) = split_two(rest)?;
        Ok(Status::Leave {
          code,
          message,
          room: room.to_string(),
          username,
        })
      }
      CMD_ROOM_USERS => {
        let (room, rest) = split_at_chars(args, NAME_LEN).ok_or(ProtoError::Malformed)?;
        let (list, message) = split_two(rest)?;
        Ok(Status::RoomUsers {
          code,
          message,
          room: room.to_string(),
          users: split_list(&list),
        })
      }
      CMD_LIST_ROOMS => {
        let (list, message) = split_two(args)?;
        Ok(Status::RoomList {
          code,
          message,
          rooms: split_list(&list),
        })
      }
      _ => Ok(Status::Base {
        code,
        message: rest.to_string(),
      }),
    }
  }
}

/// Exactly two `#`-separated fields.
fn split_two(s: &str) -> Result<(String, String), ProtoError> {
  let fields: Vec<&str> = s.split('#').collect();
  if fields.len() != 2 {
    return Err(ProtoError::Malformed);
  }
  Ok((fields[0].to_string(), fields[1].to_string()))
}

/// An `&`-joined list; the empty string is the empty list.
fn split_list(s: &str) -> Vec<String> {
  if s.is_empty() {
    Vec::new()
  } else {
    s.split('&').map(str::to_string).collect()
  }
}
