use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;

use log::{debug, warn};

use common::proto::{self, code, Command, Status};
use common::signal::RunningSignal;

use crate::dispatch;
use crate::registry::Registry;

const READ_SIZE: usize = 10240;

/** Supervise one accepted connection: run the registration phase,
then spawn the reader and writer threads and join them. The socket
is shut down exactly once, here, after both threads are gone.
*/
pub fn drive(stream: TcpStream, registry: Arc<Registry>) {
  let addr = match stream.peer_addr() {
    Ok(a) => a.to_string(),
    Err(e) => {
      debug!("drive(): error retrieving peer address: {}", &e);
      return;
    }
  };
  if let Err(e) = stream.set_nodelay(true) {
    debug!("drive({}): unable to set_nodelay: {}", &addr, &e);
  }

  let mut stream = stream;
  match registration_phase(&mut stream, &addr, &registry) {
    None => {
      debug!("drive({}): peer left during registration", &addr);
      let _ = stream.shutdown(Shutdown::Both);
    }
    Some((username, remained)) => {
      communication_phase(stream, addr, username, remained, registry);
    }
  }
}

/** Read frames and answer them directly on the socket until one
registration succeeds. Only Register commands do anything here;
everything else is told to register first. Returns the registered
username and any frames that followed the successful registration
in the same read, which the reader thread must process before
touching the socket again. `None` when the peer leaves first.
*/
fn registration_phase(
  stream: &mut TcpStream,
  addr: &str,
  registry: &Registry,
) -> Option<(String, Vec<String>)> {
  let mut buf = vec![0u8; READ_SIZE];
  loop {
    let n = match stream.read(&mut buf) {
      Ok(0) => return None,
      Ok(n) => n,
      Err(e) => {
        debug!("registration_phase({}): read error: {}", addr, &e);
        return None;
      }
    };
    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
    let frames: Vec<String> = proto::extract_frames(&chunk)
      .iter()
      .map(|f| f.to_string())
      .collect();
    for (index, frame) in frames.iter().enumerate() {
      let status = match Command::decode(frame) {
        Ok(Command::Register { .. }) => dispatch::dispatch(registry, addr, frame),
        Ok(_) => Status::base(
          code::NOT_REGISTERED,
          "Not registered address, register a username first.",
        ),
        Err(_) => Status::base(code::BAD_COMMAND, "Bad command"),
      };
      if let Err(e) = stream.write_all(&status.to_bytes()) {
        debug!("registration_phase({}): write error: {}", addr, &e);
        return None;
      }
      if status.code() == code::SUCCESS {
        if let Status::Registration { username, .. } = status {
          let remained = frames[index + 1..].to_vec();
          return Some((username, remained));
        }
      }
    }
  }
}

fn communication_phase(
  stream: TcpStream,
  addr: String,
  username: String,
  remained: Vec<String>,
  registry: Arc<Registry>,
) {
  let signal = Arc::new(RunningSignal::new(true));

  let (reader_stream, writer_stream) = match (stream.try_clone(), stream.try_clone()) {
    (Ok(r), Ok(w)) => (r, w),
    _ => {
      warn!("communication_phase({}): unable to clone the stream", &addr);
      synthesize_disconnect(&registry, &addr, &signal);
      let _ = stream.shutdown(Shutdown::Both);
      return;
    }
  };

  let reader = {
    let addr = addr.clone();
    let username = username.clone();
    let signal = Arc::clone(&signal);
    let registry = Arc::clone(&registry);
    thread::spawn(move || {
      receiving_thread(reader_stream, addr, username, signal, registry, remained)
    })
  };
  let writer = {
    let addr = addr.clone();
    let signal = Arc::clone(&signal);
    let registry = Arc::clone(&registry);
    thread::spawn(move || sending_thread(writer_stream, addr, signal, registry))
  };

  let _ = reader.join();
  let _ = writer.join();
  let _ = stream.shutdown(Shutdown::Both);
  debug!("communication_phase({}): connection closed", &addr);
}

/** The producer half: read, frame, dispatch. A successful
disconnect of this connection's own user (commanded or synthesised)
flips the signal so both halves wind down.
*/
fn receiving_thread(
  mut stream: TcpStream,
  addr: String,
  username: String,
  signal: Arc<RunningSignal>,
  registry: Arc<Registry>,
  remained: Vec<String>,
) {
  let mut pending = remained;
  let mut buf = vec![0u8; READ_SIZE];
  while signal.is_run() {
    for frame in pending.drain(..) {
      let status = dispatch::dispatch(&registry, &addr, &frame);
      if status.code() == code::SUCCESS {
        if let Status::Disconnect {
          username: disconnected,
          ..
        } = &status
        {
          if disconnected == &username {
            let cleared = registry.clear_conn(&addr);
            if cleared.code() != code::SUCCESS {
              debug!("receiving_thread({}): record already cleared", &addr);
            }
            signal.set_stop();
          }
        }
      }
    }
    if !signal.is_run() {
      break;
    }
    match stream.read(&mut buf) {
      Ok(0) => {
        // Orderly close without a Disconnect command; clean the
        // registry up as if one had been sent.
        synthesize_disconnect(&registry, &addr, &signal);
        break;
      }
      Ok(n) => {
        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
        pending = proto::extract_frames(&chunk)
          .iter()
          .map(|f| f.to_string())
          .collect();
      }
      Err(e) => {
        debug!("receiving_thread({}): read error: {}", &addr, &e);
        synthesize_disconnect(&registry, &addr, &signal);
        break;
      }
    }
  }
}

/** The consumer half: block on the mailbox and write each drained
status to the socket. The disconnect sentinel and an unbound
address both mean this user is gone.
*/
fn sending_thread(
  mut stream: TcpStream,
  addr: String,
  signal: Arc<RunningSignal>,
  registry: Arc<Registry>,
) {
  while signal.is_run() {
    match registry.flush_message_queue(&addr) {
      Err(_) => {
        debug!("sending_thread({}): user disconnected", &addr);
        break;
      }
      // The disconnect latch fired while we were blocked.
      Ok(None) => break,
      Ok(Some(batch)) => {
        for status in batch {
          if let Err(e) = stream.write_all(&status.to_bytes()) {
            debug!("sending_thread({}): write error: {}", &addr, &e);
            synthesize_disconnect(&registry, &addr, &signal);
            return;
          }
        }
      }
    }
  }
}

/** The dance both threads run when the peer vanishes: resolve the
address to its user and execute a disconnect on their behalf.
Losing the resolution race to the other thread of this connection
just means flipping the signal and going away quietly.
*/
fn synthesize_disconnect(registry: &Registry, addr: &str, signal: &RunningSignal) {
  match registry.user_by_addr(addr) {
    Ok(username) => {
      let frame = format!("{}{}", proto::CMD_DISCONNECT, username);
      let _ = dispatch::dispatch(registry, addr, &frame);
      let cleared = registry.clear_conn(addr);
      if cleared.code() != code::SUCCESS {
        debug!("synthesize_disconnect({}): record already cleared", addr);
      }
      signal.set_stop();
    }
    Err(_) => {
      // The other thread of this connection got here first.
      signal.set_stop();
    }
  }
}
