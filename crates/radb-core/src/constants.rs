//! Protocol and configuration constants for radb.

use std::time::Duration;

// =============================================================================
// Smart-socket constants
// =============================================================================

/// Server version reported by `host:version`.
pub const SERVER_VERSION: u32 = 41;

/// Maximum smart-socket request payload (4 hex digits of length).
pub const MAX_REQUEST_LEN: usize = 0xFFFF;

/// Length of the hex length prefix.
pub const REQUEST_PREFIX_LEN: usize = 4;

// =============================================================================
// Shell Protocol v2 constants
// =============================================================================

/// Shell v2 packet header: 1-byte id + 4-byte little-endian length.
pub const SHELL_PACKET_HEADER_LEN: usize = 5;

/// Chunk size for stdout/stderr packets sent to the client.
pub const SHELL_CHUNK_SIZE: usize = 4096;

/// Maximum accepted shell v2 packet payload.
pub const SHELL_MAX_PACKET: usize = 1024 * 1024;

// =============================================================================
// Sync sub-protocol constants
// =============================================================================

/// Sync frame header: 4-byte ASCII id + 4-byte little-endian length.
pub const SYNC_FRAME_HEADER_LEN: usize = 8;

/// Maximum sync DATA chunk size.
pub const SYNC_MAX_CHUNK: usize = 64 * 1024;

/// Maximum path length accepted by sync requests.
pub const SYNC_MAX_PATH: usize = 1024;

// =============================================================================
// Timing constants
// =============================================================================

/// Grace period between SIGTERM and SIGKILL when tearing down a child.
pub const CHILD_KILL_GRACE: Duration = Duration::from_secs(2);

/// Poll interval while waiting for a PTY child to be reaped.
pub const CHILD_REAP_POLL: Duration = Duration::from_millis(20);

// =============================================================================
// Default values
// =============================================================================

/// Default listen host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port (the well-known ADB server port).
pub const DEFAULT_PORT: u16 = 5037;

/// Environment variable overriding the listen port.
pub const PORT_ENV_VAR: &str = "ADB_SERVER_PORT";
