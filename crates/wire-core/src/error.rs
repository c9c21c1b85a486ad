//! Error types for wire protocol handling.

use thiserror::Error;

/// Result type alias for wire-core operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors produced while encoding, decoding, or framing messages.
///
/// Framing errors (`InvalidMagic`, `InvalidLength`, `PayloadTooLarge`,
/// `UnknownKind`) are unrecoverable for the connection they occur on:
/// once the length prefix can no longer be trusted, the stream cannot be
/// resynchronized and must be closed.
#[derive(Error, Debug)]
pub enum WireError {
    /// The header did not begin with the protocol magic.
    #[error("invalid magic: expected 0x41554453, got {found:#010x}")]
    InvalidMagic {
        /// The value found in place of the magic constant
        found: u32,
    },

    /// The header length field is smaller than the header itself.
    #[error("inconsistent length field: {length} (header is {header_len} bytes)")]
    InvalidLength {
        /// The declared total message length
        length: u32,
        /// The fixed header size
        header_len: usize,
    },

    /// The declared payload exceeds the protocol's size bound.
    #[error("payload of {length} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// The declared payload length
        length: u32,
        /// The configured maximum payload length
        limit: usize,
    },

    /// The header kind field does not map to a known message kind.
    #[error("unknown message kind {kind}")]
    UnknownKind {
        /// The raw kind value from the wire
        kind: u16,
    },

    /// An audio payload whose byte length is not a whole number of f32s.
    #[error("audio payload of {length} bytes is not a multiple of 4")]
    MisalignedAudio {
        /// The offending payload length
        length: usize,
    },

    /// A CONFIG payload of the wrong size.
    #[error("config payload must be {expected} bytes, got {length}")]
    BadConfigPayload {
        /// The required payload size
        expected: usize,
        /// The offending payload length
        length: usize,
    },

    /// The payload was used as a kind it does not carry.
    #[error("message kind {kind:?} does not carry this payload")]
    WrongKind {
        /// The actual kind of the message
        kind: crate::MessageKind,
    },

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// An underlying socket error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether this error invalidates the stream framing.
    ///
    /// A `true` result means the connection must be torn down; resuming
    /// reads would interpret arbitrary bytes as headers.
    pub fn is_framing_fatal(&self) -> bool {
        matches!(
            self,
            WireError::InvalidMagic { .. }
                | WireError::InvalidLength { .. }
                | WireError::PayloadTooLarge { .. }
                | WireError::UnknownKind { .. }
                | WireError::ConnectionClosed
                | WireError::Io(_)
        )
    }
}
