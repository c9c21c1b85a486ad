//! Error types for endpoint operations.

use thiserror::Error;

/// Result type alias for endpoint-core operations.
pub type Result<T> = std::result::Result<T, EndpointError>;

/// Errors surfaced by the endpoint pipeline.
///
/// Device open/start and initial connect failures are fatal to the
/// operation that raised them; everything that happens after streaming is
/// established (underruns, packet loss, reconnects) is reported through
/// [`EndpointEvent`](crate::EndpointEvent) instead and never appears here.
#[derive(Error, Debug)]
pub enum EndpointError {
    /// The named audio device does not exist.
    #[error("audio device not found: {name}")]
    DeviceNotFound {
        /// The device name that failed to resolve
        name: String,
    },

    /// No default device is available for the requested direction.
    #[error("no default {direction} device available")]
    NoDefaultDevice {
        /// "input" or "output"
        direction: &'static str,
    },

    /// The device rejected the requested stream configuration.
    #[error("failed to open audio stream: {reason}")]
    StreamOpen {
        /// Driver-reported reason
        reason: String,
    },

    /// The stream was built but refused to start.
    #[error("failed to start audio stream: {reason}")]
    StreamStart {
        /// Driver-reported reason
        reason: String,
    },

    /// Connecting to the relay failed.
    #[error("failed to connect to {addr}: {reason}")]
    ConnectFailed {
        /// The relay address
        addr: String,
        /// Underlying failure
        reason: String,
    },

    /// An operation that requires a live relay connection was called
    /// without one.
    #[error("not connected to a relay")]
    NotConnected,

    /// An operation is not valid in the component's current state.
    #[error("invalid state: expected {expected}, currently {actual}")]
    InvalidState {
        /// The state the operation requires
        expected: &'static str,
        /// The state the component is in
        actual: &'static str,
    },

    /// A control value is out of range.
    #[error("volume {value} outside [0.0, 1.0]")]
    InvalidVolume {
        /// The rejected value
        value: f32,
    },

    /// The endpoint configuration is inconsistent.
    #[error("invalid configuration: {details}")]
    InvalidConfig {
        /// What was wrong
        details: String,
    },

    /// The WAV recorder failed.
    #[error("recorder error: {reason}")]
    Recorder {
        /// Underlying failure
        reason: String,
    },

    /// The session logger failed.
    #[error("session log error: {0}")]
    SessionLog(#[source] std::io::Error),

    /// A wire protocol failure.
    #[error(transparent)]
    Wire(#[from] audsync_wire_core::WireError),

    /// A media plumbing failure.
    #[error(transparent)]
    Stream(#[from] audsync_stream_core::StreamError),

    /// An underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
