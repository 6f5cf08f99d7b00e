//! Built-in services registered by the server.

pub mod host;
pub mod shell;
pub mod sync;

pub use host::HostService;
pub use shell::ShellService;
pub use sync::SyncService;
