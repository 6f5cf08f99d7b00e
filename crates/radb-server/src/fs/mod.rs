//! Filesystem abstraction consumed by the sync service.
//!
//! Implementations can back the sync protocol with local disk, memory, or
//! anything else. Paths are opaque UTF-8 strings interpreted by the
//! implementation.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use radb_core::error::Result;
pub use radb_core::protocol::sync::{Dirent, FileStat};

pub mod local;
pub mod memory;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

/// Boxed byte reader handed to the sync RECV path.
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed byte writer handed to the sync SEND path. Content is durable
/// once `shutdown()` completes.
pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The contract the sync service consumes.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Stat a path. Missing paths are `Ok(None)`, not an error.
    async fn stat(&self, path: &str) -> Result<Option<FileStat>>;

    /// List a directory's entries, excluding `.` and `..`, in the
    /// backend's natural order.
    async fn read_dir(&self, path: &str) -> Result<Vec<Dirent>>;

    /// Open a file for reading.
    async fn open_for_read(&self, path: &str) -> Result<FileReader>;

    /// Open a file for writing with the given mode bits, creating parent
    /// directories as needed.
    async fn open_for_write(&self, path: &str, mode: u32) -> Result<FileWriter>;

    /// Set the modification time; best-effort where the platform's
    /// semantics are limited.
    async fn set_mtime(&self, path: &str, mtime: u32) -> Result<()>;

    /// Create a directory and any missing parents. Idempotent.
    async fn makedirs(&self, path: &str) -> Result<()>;
}
