//! Error types for the relay.

use thiserror::Error;

/// Result type alias for relay-engine operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors surfaced by the relay.
///
/// Only startup can fail hard; once the relay is listening, per-client
/// failures close that client's session and nothing else.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The listen socket could not be bound.
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// The requested listen address
        addr: String,
        /// The underlying failure
        reason: String,
    },

    /// A wire protocol failure on a client connection.
    #[error(transparent)]
    Wire(#[from] audsync_wire_core::WireError),

    /// An underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
