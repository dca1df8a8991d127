//! Crate-wide fatal/typed error taxonomy.
//!
//! This is deliberately narrow. Expected, per-request outcomes
//! (`NOT_FOUND`, `NOT_STORED`, `EXISTS`, a non-numeric value on `incr`/
//! `decr`, ...) are not errors in the Rust sense — they're ordinary
//! values returned from storage operations (see [`crate::storage::StorageError`]).
//! `CacheError` is reserved for what can't be mapped to a wire reply by
//! the dispatcher: bad startup configuration, I/O failure, or framing so
//! broken the connection can't continue.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Fatal or connection-ending errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Startup configuration was invalid after merging file/env/CLI sources.
    #[error("bad configuration: {0}")]
    Config(String),

    /// An I/O failure, almost always at startup (bind) or on a dead socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream could not be parsed as a valid request and the
    /// connection cannot be trusted to continue (spec §4.C "MalformedError
    /// is unrecoverable for the connection").
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_message() {
        let e = CacheError::Config("cuckoo_nitem must be > 0".to_string());
        assert_eq!(e.to_string(), "bad configuration: cuckoo_nitem must be > 0");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "addr in use");
        let e: CacheError = io_err.into();
        assert!(matches!(e, CacheError::Io(_)));
    }

    #[test]
    fn protocol_error_displays_message() {
        let e = CacheError::Protocol("missing CRLF".to_string());
        assert_eq!(e.to_string(), "protocol error: missing CRLF");
    }
}
