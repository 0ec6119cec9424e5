mod dispatch;
mod driver;
mod listener;
mod mailbox;
mod registry;

use clap::Parser;
use log::{error, info};
use simplelog::WriteLogger;

use common::config::ServerConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct ClapOpts {
  /// TCP port to listen on
  port: u16,

  #[arg(short = 'c', long = "config")]
  config: Option<String>,
}

fn main() {
  let opts = ClapOpts::parse();
  let cfg = ServerConfig::configure(opts.config);
  WriteLogger::init(
    cfg.log_level,
    simplelog::Config::default(),
    std::fs::File::create(&cfg.log_file).unwrap(),
  )
  .unwrap();

  let bind_addr = format!("{}:{}", &cfg.host, opts.port);
  let server = match listener::Server::bind(&bind_addr) {
    Ok(s) => s,
    Err(e) => {
      println!("Unable to bind {}: {}", &bind_addr, &e);
      error!("Unable to bind {}: {}", &bind_addr, &e);
      std::process::exit(1);
    }
  };
  println!("Listening on {}", &bind_addr);
  info!("Listening on {}", &bind_addr);
  server.run();
}
