use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use log::debug;

use crate::driver;
use crate::registry::Registry;

/** Owns the listening socket and the shared registry. One driver
thread per accepted connection; no connection accounting happens at
this level.
*/
pub struct Server {
  listener: TcpListener,
  registry: Arc<Registry>,
}

impl Server {
  pub fn bind(addr: &str) -> io::Result<Server> {
    let listener = TcpListener::bind(addr)?;
    Ok(Server {
      listener,
      registry: Arc::new(Registry::new()),
    })
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.listener.local_addr()
  }

  pub fn run(&self) {
    for res in self.listener.incoming() {
      match res {
        Err(e) => {
          debug!("run(): Error accepting connection: {}", &e);
        }
        Ok(stream) => {
          debug!("run(): Accepted connection from {:?}", stream.peer_addr());
          let registry = Arc::clone(&self.registry);
          thread::spawn(move || driver::drive(stream, registry));
        }
      }
    }
  }
}
