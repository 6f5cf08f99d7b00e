//! radb-server: host-side ADB smart-socket server.
//!
//! Provides:
//! - The per-connection session engine and smart-socket dispatch loop
//! - Pattern-based request routing with an ambient current session
//! - The four-mode shell service (raw/v2 x non-interactive/interactive)
//! - The binary sync file-transfer service over a pluggable filesystem
//! - Built-in host services (`host:version`, `host:kill`, device listing,
//!   transport selection)
//! - CLI argument parsing for the server binary
//!
//! Embedders register their own routes and service objects on a [`Router`]
//! and hand it to [`AdbServer::bind_with`]; user routes override the
//! built-ins.

pub mod cli;
pub mod config;
pub mod device;
pub mod fs;
pub mod listener;
#[cfg(unix)]
pub mod pty;
pub mod router;
pub mod services;
pub mod session;
pub mod shutdown;

pub use cli::Cli;
pub use config::ServerConfig;
pub use device::{Device, SingleDeviceManager};
pub use fs::{FileSystem, LocalFileSystem, MemoryFileSystem};
pub use listener::AdbServer;
pub use router::{current_session, try_current_session, Disposition, Params, Response, Router};
pub use session::{Session, SessionHandle};
pub use shutdown::Shutdown;
