//! Error types for media plumbing.

use thiserror::Error;

/// Result type alias for stream-core operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors produced by stream-core components.
///
/// Runtime paths in this crate are designed not to fail (buffers do what
/// they can and report partial completion); errors surface only from
/// invalid configuration.
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    /// A configuration value is out of its valid range.
    #[error("invalid configuration: {details}")]
    InvalidConfig {
        /// What was wrong with the configuration
        details: String,
    },
}
