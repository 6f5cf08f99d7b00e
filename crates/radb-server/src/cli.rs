//! Server CLI implementation.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use radb_core::constants::{DEFAULT_HOST, DEFAULT_PORT};

use crate::config::ServerConfig;

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for radb_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => radb_core::LogFormat::Text,
            CliLogFormat::Json => radb_core::LogFormat::Json,
        }
    }
}

/// radb-server - ADB smart-socket compatible server.
#[derive(Debug, Parser)]
#[command(
    name = "radb-server",
    version,
    about = "radb-server - ADB smart-socket compatible server"
)]
pub struct Cli {
    /// Address to listen on
    #[arg(long = "host", default_value = DEFAULT_HOST)]
    pub host: IpAddr,

    /// Port to listen on (0 = ephemeral)
    #[arg(short = 'p', long = "port", env = "ADB_SERVER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Serve sync requests relative to this directory
    #[arg(long = "sync-root", value_name = "DIR")]
    pub sync_root: Option<PathBuf>,

    /// Increase verbosity (can be repeated: -v, -vv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Socket address to bind.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Logging verbosity; info by default, raised by `-v`.
    pub fn verbosity(&self) -> u8 {
        2 + self.verbose
    }

    /// Server configuration from the parsed flags.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.socket_addr(),
            sync_root: self.sync_root.clone(),
            ..ServerConfig::default()
        }
    }
}
