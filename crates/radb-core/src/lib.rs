//! radb-core: wire protocol and shared plumbing for the radb server.
//!
//! Provides:
//! - Smart-socket request/response framing (4-hex-digit length prefix)
//! - Shell Protocol v2 packet codec
//! - Sync sub-protocol frame codec and file metadata types
//! - Error taxonomy and logging setup

pub mod constants;
pub mod error;
pub mod logging;
pub mod protocol;

pub use error::{Error, Result};
pub use logging::{init_logging, init_test_logging, LogFormat};
