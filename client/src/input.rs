use std::io::Write;

use common::proto::{pad_name, Command};

/// Print `text` as a prompt and read one line. `None` on EOF.
pub fn prompt(text: &str) -> Option<String> {
    print!("{}", text);
    std::io::stdout().flush().unwrap();
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(&['\r', '\n'][..]).to_string()),
    }
}

/// Ask for one name and pad it to the wire width.
pub fn input_name(kind: &str) -> Option<String> {
    println!("{} (20 characters max, no newline):", kind);
    let raw = prompt("> ")?;
    match pad_name(&raw) {
        Some(padded) => Some(padded),
        None => {
            println!("Invalid input: at most 20 characters, none of '$', '#', '&'.");
            None
        }
    }
}

/// Ask for names until the user stops answering "y".
fn input_names(kind: &str, more: &str) -> Option<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    loop {
        let name = input_name(kind)?;
        if !names.contains(&name) {
            names.push(name);
        }
        println!("{}", more);
        let answer = prompt("> ")?;
        if answer != "y" && answer != "Y" {
            break;
        }
    }
    if names.len() >= 100 {
        println!("Must provide less than 100 names.");
        return None;
    }
    Some(names)
}

fn input_message() -> Option<String> {
    println!("message (enter newline to end):");
    prompt("> ")
}

/** Read one top-level command and gather its arguments. `None`
means nothing to send (unrecognised input or an abandoned prompt);
EOF on stdin turns into a disconnect so the session still ends
cleanly.
*/
pub fn read_command(username: &str) -> Option<Command> {
    let word = match prompt(">>> ") {
        None => {
            return Some(Command::Disconnect {
                username: String::from(username),
            });
        }
        Some(w) => w,
    };
    match word.as_str() {
        "register" => input_name("username").map(|username| Command::Register { username }),
        "join" => input_name("room name").map(|room| Command::Join {
            room,
            username: String::from(username),
        }),
        "room message" => {
            let rooms = input_names("room name", "send to more rooms? (y/n)")?;
            let body = input_message()?;
            Some(Command::RoomMessage { rooms, body })
        }
        "private message" => {
            let users = input_names("username", "send to more users? (y/n)")?;
            let body = input_message()?;
            Some(Command::PrivateMessage { users, body })
        }
        "leave" => input_name("room name").map(|room| Command::Leave {
            room,
            username: String::from(username),
        }),
        "room users" => input_name("room name").map(|room| Command::ListRoomUsers { room }),
        "rooms" => Some(Command::ListRooms),
        "quit" => Some(Command::Disconnect {
            username: String::from(username),
        }),
        _ => {
            println!("Command not found");
            None
        }
    }
}
