//! Error types for gantry-core.

use thiserror::Error;

/// Main error type for gantry operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or out-of-bounds data on the SBC link.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// SBC link transport failure (timeout, peer silence, reset).
    #[error("link error: {message}")]
    Link { message: String },

    /// Output buffer pool is exhausted.
    #[error("no output buffers available")]
    NoBuffers,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Storage layer failure (file create/write/rename).
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl Error {
    /// Returns true if the error is expected to clear on its own once the
    /// peer retries (the link re-enters the header phase, the client
    /// reconnects).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Link { .. } | Error::Timeout | Error::ConnectionClosed | Error::NoBuffers
        )
    }
}

/// Convenience result type for gantry operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_protocol() {
        let err = Error::Protocol {
            message: "packet overruns payload".into(),
        };
        assert_eq!(err.to_string(), "protocol error: packet overruns payload");
    }

    #[test]
    fn error_display_no_buffers() {
        assert_eq!(Error::NoBuffers.to_string(), "no output buffers available");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn transient_errors() {
        assert!(Error::Timeout.is_transient());
        assert!(Error::ConnectionClosed.is_transient());
        assert!(Error::NoBuffers.is_transient());
        assert!(Error::Link { message: "stall".into() }.is_transient());

        assert!(!Error::Protocol { message: "bad".into() }.is_transient());
        assert!(!Error::Storage { message: "full".into() }.is_transient());
    }
}
