use simplelog::LevelFilter;
use std::path::PathBuf;

const CLIENT_NAME: &str = "relay.toml";
const SERVER_NAME: &str = "relayd.toml";

//  Default values
const HOST: &str = "0.0.0.0"; // server bind host
const SERVER_LOG: &str = "relayd.log"; // server log file
const LOG_LEVEL: LevelFilter = LevelFilter::Warn; // log level for both binaries
const CLIENT_HOST: &str = "127.0.0.1"; // client connect host
const CLIENT_PORT: u16 = 8000; // client connect port
const CLIENT_LOG: &str = "relay.log"; // client log file

/** Contents of the first readable config file among: an explicitly
requested path, `file_name` in the working directory, `file_name`
in the platform config directory. `None` when nothing is readable
anywhere, which just means the compiled defaults apply.
*/
fn load_first(file_name: &str, explicit: Option<String>) -> Option<String> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(requested) = explicit {
        candidates.push(PathBuf::from(requested));
    }
    candidates.push(PathBuf::from(file_name));
    if let Some(base) = directories::BaseDirs::new() {
        candidates.push(base.config_dir().join(file_name));
    }
    candidates
        .into_iter()
        .find_map(|candidate| std::fs::read_to_string(candidate).ok())
}

fn level_from(n: Option<u8>) -> LevelFilter {
    match n {
        None => LOG_LEVEL,
        Some(0) => LevelFilter::Off,
        Some(1) => LevelFilter::Error,
        Some(2) => LevelFilter::Warn,
        Some(3) => LevelFilter::Info,
        Some(4) => LevelFilter::Debug,
        Some(5) => LevelFilter::Trace,
        Some(_) => {
            println!("Invalid log level in config file.");
            LevelFilter::Trace
        }
    }
}

#[derive(serde::Deserialize, Default)]
struct ServerConfigFile {
    host: Option<String>,
    log_file: Option<String>,
    log_level: Option<u8>,
}

#[derive(Debug)]
pub struct ServerConfig {
    pub host: String,
    pub log_file: String,
    pub log_level: LevelFilter,
}

impl ServerConfig {
    /** Load the server configuration, trying `path` first (when
    given), then `relayd.toml` in the working directory, then the
    platform config directory. A missing file is not an error: every
    field has a compiled default. The listen port is not configured
    here; it comes from the command line.
    */
    pub fn configure(path: Option<String>) -> ServerConfig {
        let cfg_file: ServerConfigFile = match load_first(SERVER_NAME, path) {
            Some(content) => match toml::from_str(&content) {
                Ok(x) => x,
                Err(e) => {
                    println!("Error parsing config file: {}", &e);
                    std::process::exit(1);
                }
            },
            None => ServerConfigFile::default(),
        };

        ServerConfig {
            host: cfg_file.host.unwrap_or_else(|| HOST.to_string()),
            log_file: cfg_file.log_file.unwrap_or_else(|| SERVER_LOG.to_string()),
            log_level: level_from(cfg_file.log_level),
        }
    }
}

#[derive(serde::Deserialize, Default)]
struct ClientConfigFile {
    host: Option<String>,
    port: Option<u16>,
    log_file: Option<String>,
    log_level: Option<u8>,
}

#[derive(Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub log_file: String,
    pub log_level: LevelFilter,
}

impl ClientConfig {
    pub fn configure(path: Option<String>) -> Result<ClientConfig, String> {
        let f: ClientConfigFile = match load_first(CLIENT_NAME, path) {
            Some(content) => match toml::from_str(&content) {
                Ok(x) => x,
                Err(e) => {
                    return Err(format!("Error parsing config file: {}", &e));
                }
            },
            None => ClientConfigFile::default(),
        };

        Ok(ClientConfig {
            host: f.host.unwrap_or_else(|| String::from(CLIENT_HOST)),
            port: f.port.unwrap_or(CLIENT_PORT),
            log_file: f.log_file.unwrap_or_else(|| String::from(CLIENT_LOG)),
            log_level: level_from(f.log_level),
        })
    }
}
