use common::proto::{code, Status};

/// Codes the client knows how to render as errors. 411 is reserved
/// by the protocol and never currently sent.
const ERROR_CODES: [u16; 14] = [
    400, 401, 402, 403, 410, 411, 420, 450, 451, 462, 496, 497, 498, 499,
];

/// Render one server status for the terminal.
pub fn print_status(status: &Status) {
    let c = status.code();
    if c == code::SUCCESS {
        print_success(status);
    } else if ERROR_CODES.contains(&c) {
        print_error(status);
    } else {
        println!("unknown status code...");
    }
}

fn print_success(status: &Status) {
    match status {
        Status::Base { message, .. } => println!("{}", message),
        Status::Registration {
            username, message, ..
        } => {
            println!("[Registration] {}: {}", username.trim_end(), message);
        }
        Status::Join {
            room,
            username,
            is_creation,
            ..
        } => {
            let verb = if *is_creation { "created" } else { "joined" };
            println!("[Room] {} {} {}", room.trim_end(), username.trim_end(), verb);
        }
        Status::Message {
            to_room: true,
            room,
            sender,
            body,
            ..
        } => {
            println!("[Room] {} {} sent: {}", room.trim_end(), sender.trim_end(), body);
        }
        Status::Message {
            to_room: false,
            sender,
            username,
            body,
            ..
        } => {
            println!(
                "[Private] {} sent to {}: {}",
                sender.trim_end(),
                username.trim_end(),
                body
            );
        }
        Status::Disconnect { username, room, .. } => {
            if room.trim_end().is_empty() {
                println!("[Disconnection] {} disconnected.", username.trim_end());
            } else {
                println!(
                    "[Room] {} {} disconnected.",
                    room.trim_end(),
                    username.trim_end()
                );
            }
        }
        Status::Leave { room, username, .. } => {
            println!("[Room] {} {} left", room.trim_end(), username.trim_end());
        }
        Status::RoomUsers { room, users, .. } => {
            println!("[Room] {}\nCurrent joined users:", room.trim_end());
            for user in users {
                println!("{}", user.trim_end());
            }
        }
        Status::RoomList { rooms, .. } => {
            println!("[Room] Current room list:");
            for room in rooms {
                println!("{}", room.trim_end());
            }
        }
    }
}

fn print_error(status: &Status) {
    let c = status.code();
    match status {
        Status::Message {
            to_room: true,
            room,
            message,
            ..
        } => {
            println!("[Error code {}] {} {}", c, room.trim_end(), message);
        }
        Status::Message {
            to_room: false,
            username,
            message,
            ..
        } => {
            println!("[Error code {}] {} {}", c, username.trim_end(), message);
        }
        Status::Base { message, .. }
        | Status::Registration { message, .. }
        | Status::Join { message, .. }
        | Status::Disconnect { message, .. }
        | Status::Leave { message, .. }
        | Status::RoomUsers { message, .. }
        | Status::RoomList { message, .. } => {
            println!("[Error code {}] {}", c, message);
        }
    }
}
