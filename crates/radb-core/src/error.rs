//! Error types for radb-core.

use thiserror::Error;

/// Main error type for radb operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol violation or malformed request.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Codec error during encoding/decoding.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Shell service failure (spawn, pump, wait).
    #[error("shell error: {message}")]
    Shell { message: String },

    /// PTY error.
    #[error("pty error: {message}")]
    Pty { message: String },

    /// Sync sub-protocol failure.
    #[error("sync error: {message}")]
    Sync { message: String },

    /// Connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation aborted by the process-wide shutdown signal.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Shorthand for a protocol error with a message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Shorthand for a codec error with a message.
    pub fn codec(message: impl Into<String>) -> Self {
        Error::Codec {
            message: message.into(),
        }
    }

    /// Returns true if this error means the peer went away and the
    /// session should terminate silently.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed | Error::Cancelled => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Convenience result type for radb operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_protocol() {
        let err = Error::protocol("malformed length");
        assert_eq!(err.to_string(), "protocol error: malformed length");
    }

    #[test]
    fn error_display_codec() {
        let err = Error::codec("oversize");
        assert_eq!(err.to_string(), "codec error: oversize");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn disconnect_classification() {
        assert!(Error::ConnectionClosed.is_disconnect());
        assert!(Error::Cancelled.is_disconnect());
        assert!(Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe"
        ))
        .is_disconnect());
        assert!(Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset"
        ))
        .is_disconnect());

        assert!(!Error::protocol("bad").is_disconnect());
        assert!(!Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied"
        ))
        .is_disconnect());
    }
}
