use crate::config::ConfigError;
use clap::{Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3001;

/// Find default config path with priority:
/// 1. /etc/plexletter/config.json (system-wide)
/// 2. ~/.config/plexletter/config.json (user-specific)
/// 3. ./config.json, created on first save
pub fn default_config_path() -> PathBuf {
    let etc_path = PathBuf::from("/etc/plexletter/config.json");
    if etc_path.exists() {
        return etc_path;
    }

    if let Some(config_dir) = dirs::config_dir() {
        let user_path = config_dir.join("plexletter/config.json");
        if user_path.exists() {
            return user_path;
        }
    }

    PathBuf::from("config.json")
}

/// Address to serve on: `--listen` wins, then `PORT` on localhost, then the default port
pub fn listen_addr(listen: Option<&str>, port_env: Option<&str>) -> Result<SocketAddr, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        field: "listen",
        reason,
    };

    if let Some(listen) = listen {
        let listen = listen.trim();
        if let Ok(addr) = listen.parse::<SocketAddr>() {
            return Ok(addr);
        }
        if let Ok(ip) = listen.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, DEFAULT_PORT));
        }
        return Err(invalid(format!(
            "'{listen}' is not ip:port (e.g. 127.0.0.1:{DEFAULT_PORT}) or ip"
        )));
    }

    let port = match port_env.map(str::trim).filter(|p| !p.is_empty()) {
        Some(port) => port
            .parse::<u16>()
            .map_err(|e| invalid(format!("PORT '{port}': {e}")))?,
        None => DEFAULT_PORT,
    };
    Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
}

#[derive(Parser)]
#[command(name = "plexletter")]
#[command(version)]
#[command(about = "Plex newsletter backend: settings, connection tests and Tautulli watch summaries", long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API until interrupted
    Serve {
        /// Path to configuration file
        #[arg(short, long, value_name = "FILE", default_value_os_t = default_config_path())]
        config: PathBuf,

        /// Listen address (ip:port); defaults to 127.0.0.1 and $PORT or 3001
        #[arg(short, long, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Summarize recent watch history and print it as JSON
    Summary {
        /// Path to configuration file
        #[arg(short, long, value_name = "FILE", default_value_os_t = default_config_path())]
        config: PathBuf,

        /// Number of days to look back (default from config, usually 7)
        #[arg(short, long, value_name = "DAYS")]
        days: Option<u32>,
    },

    /// Test the Plex, Tautulli and SMTP connections
    Check {
        /// Path to configuration file
        #[arg(short, long, value_name = "FILE", default_value_os_t = default_config_path())]
        config: PathBuf,
    },
}
