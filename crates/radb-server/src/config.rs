//! Server configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use radb_core::constants::{DEFAULT_HOST, DEFAULT_PORT, SERVER_VERSION};

use crate::device::Device;

/// Configuration handed to [`crate::AdbServer::bind`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
    /// Version reported by `host:version`.
    pub version: u32,
    /// The single attached device.
    pub device: Device,
    /// Base directory for the sync service; defaults to the process's
    /// working directory.
    pub sync_root: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let host: IpAddr = DEFAULT_HOST.parse().expect("default host is a valid IP");
        Self {
            bind_addr: SocketAddr::new(host, DEFAULT_PORT),
            version: SERVER_VERSION,
            device: Device::default(),
            sync_root: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_adb_port() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:5037");
        assert_eq!(config.version, 41);
        assert!(config.sync_root.is_none());
    }
}
