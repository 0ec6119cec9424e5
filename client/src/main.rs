mod input;
mod message;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use log::debug;
use simplelog::WriteLogger;

use common::config::ClientConfig;
use common::proto::{self, code, Command, Status};
use common::signal::RunningSignal;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct ClapOpts {
    /// Server host
    host: Option<String>,

    /// Server port
    port: Option<u16>,

    #[arg(short = 'c', long = "config")]
    config: Option<String>,
}

fn configure() -> ClientConfig {
    let opts = ClapOpts::parse();

    let mut cfg = match ClientConfig::configure(opts.config) {
        Ok(x) => x,
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(host) = opts.host {
        cfg.host = host;
    }
    if let Some(port) = opts.port {
        cfg.port = port;
    }
    cfg
}

fn print_greeting() {
    println!("Framed-text chat client");
    println!("\ntype 'register' first to register a username");
    println!("\nAfter registration, the following commands are available:");
    println!("join\nroom message\nprivate message\nquit\nleave\nroom users\nrooms\n");
}

fn main() {
    let cfg = configure();
    WriteLogger::init(
        cfg.log_level,
        simplelog::Config::default(),
        std::fs::File::create(&cfg.log_file).unwrap(),
    )
    .unwrap();

    let addr = format!("{}:{}", &cfg.host, cfg.port);
    println!("Attempting to connect to {}...", &addr);
    let stream = match TcpStream::connect(&addr) {
        Ok(s) => s,
        Err(e) => {
            println!("{}", e);
            std::process::exit(2);
        }
    };
    debug!("connected to {}", &addr);

    print_greeting();
    let username = match registration_phase(&stream) {
        Some(name) => name,
        None => return,
    };
    communication_phase(stream, username);
    println!("Disconnected from server successfully.");
}

/** Prompt until one registration succeeds. Responses in this phase
come straight back on the socket, one blocking read per attempt.
`None` when the user quits or the server goes away first.
*/
fn registration_phase(stream: &TcpStream) -> Option<String> {
    let mut sock = stream;
    let mut buf = [0u8; 4096];
    loop {
        let word = input::prompt(">>> ")?;
        if word == "quit" {
            return None;
        }
        if word != "register" {
            println!("type 'register' to register a username first.");
            continue;
        }
        let username = match input::input_name("username") {
            Some(name) => name,
            None => continue,
        };
        let command = Command::Register { username };
        if sock.write_all(&command.to_bytes()).is_err() {
            println!("server disconnected.");
            return None;
        }

        let n = match sock.read(&mut buf) {
            Ok(0) | Err(_) => {
                println!("server disconnected.");
                return None;
            }
            Ok(n) => n,
        };
        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
        for frame in proto::extract_frames(&chunk) {
            match Status::decode(frame) {
                Ok(status) => {
                    message::print_status(&status);
                    if let Status::Registration {
                        code: c, username, ..
                    } = &status
                    {
                        if *c == code::SUCCESS {
                            return Some(username.clone());
                        }
                    }
                }
                Err(e) => debug!("registration_phase: discarding frame: {}", e),
            }
        }
    }
}

/** The interactive phase: this thread prompts and sends, a second
thread receives and prints, and a shared signal winds both down.
*/
fn communication_phase(stream: TcpStream, username: String) {
    let signal = Arc::new(RunningSignal::new(true));
    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            println!("Unable to read from the server: {}", e);
            return;
        }
    };

    let receiver = {
        let username = username.clone();
        let signal = Arc::clone(&signal);
        thread::spawn(move || receiving_thread(reader_stream, username, signal))
    };

    sending_loop(&stream, &username, &signal);
    let _ = receiver.join();
}

fn sending_loop(stream: &TcpStream, username: &str, signal: &RunningSignal) {
    let mut sock = stream;
    while signal.is_run() {
        let command = match input::read_command(username) {
            Some(c) => c,
            None => continue,
        };
        let quitting = matches!(command, Command::Disconnect { .. });
        if sock.write_all(&command.to_bytes()).is_err() {
            println!("server disconnected.");
            signal.set_stop();
            break;
        }
        if quitting {
            // The server tears the connection down; the receiving
            // thread sees the close and stops the session.
            break;
        }
    }
}

fn receiving_thread(mut stream: TcpStream, username: String, signal: Arc<RunningSignal>) {
    let mut buf = [0u8; 10240];
    while signal.is_run() {
        match stream.read(&mut buf) {
            Ok(0) => {
                signal.set_stop();
                break;
            }
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                for frame in proto::extract_frames(&chunk) {
                    match Status::decode(frame) {
                        Ok(status) => {
                            if let Status::Disconnect {
                                code: c,
                                username: disconnected,
                                ..
                            } = &status
                            {
                                if *c == code::SUCCESS && disconnected == &username {
                                    signal.set_stop();
                                }
                            }
                            message::print_status(&status);
                        }
                        Err(e) => debug!("receiving_thread: discarding frame: {}", e),
                    }
                }
            }
            Err(e) => {
                println!("server disconnected.");
                debug!("receiving_thread: read error: {}", e);
                signal.set_stop();
                break;
            }
        }
    }
}
