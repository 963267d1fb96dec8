//! Command-line and environment configuration.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "library-syncd")]
#[command(about = "Headless peer for library sync")]
pub struct Args {
    /// Directory holding the library files and device identity (supports ~)
    #[arg(short, long, env = "LIBRARY_SYNC_DATA_DIR", default_value = "~/.library-sync")]
    pub data_dir: String,

    /// Address to listen on for incoming peers, e.g. 0.0.0.0:8080
    #[arg(short, long, env = "LIBRARY_SYNC_LISTEN")]
    pub listen: Option<String>,

    /// WebSocket URLs of peers to dial (comma separated)
    #[arg(short, long, env = "LIBRARY_SYNC_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Name sent to peers in the hello frame
    #[arg(long, env = "LIBRARY_SYNC_DEVICE_NAME")]
    pub device_name: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Validated daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub listen: Option<String>,
    pub peers: Vec<String>,
    pub device_name: Option<String>,
}

impl DaemonConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let peers: Vec<String> = args
            .peers
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(bad) = peers
            .iter()
            .find(|p| !(p.starts_with("ws://") || p.starts_with("wss://")))
        {
            return Err(ConfigError::InvalidPeerUrl(bad.clone()));
        }

        let listen = args.listen.clone().filter(|l| !l.trim().is_empty());
        if listen.is_none() && peers.is_empty() {
            return Err(ConfigError::NothingToDo);
        }

        Ok(Self {
            data_dir: expand_tilde(&args.data_dir),
            listen,
            peers,
            device_name: args.device_name.clone().filter(|n| !n.trim().is_empty()),
        })
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Nothing to do: set --listen and/or --peers")]
    NothingToDo,

    #[error("Peer address must be a ws:// or wss:// URL: {0}")]
    InvalidPeerUrl(String),
}
