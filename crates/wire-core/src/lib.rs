//! AudSync Wire Protocol
//!
//! This crate owns everything that crosses a socket: the fixed 24-byte
//! little-endian message header, the message kinds exchanged between
//! endpoints and the relay, payload encoding for audio and stream
//! configuration, and strict length-prefixed framing over TCP.
//!
//! The protocol is deliberately minimal. Every message is
//! `[header][payload]`; the header carries a magic constant, a kind, the
//! total length, a per-sender sequence number, and a sender-side
//! microsecond timestamp. Audio payloads are raw interleaved `f32`
//! samples; stream metadata travels only in CONFIG messages.
//!
//! Framing is strict: a header that fails validation tears the connection
//! down, because a byte stream with a corrupt length prefix cannot be
//! resynchronized.

pub mod error;
pub mod framing;
pub mod message;

pub use error::{Result, WireError};
pub use framing::{read_frame, read_message, write_frame, write_message, Frame};
pub use message::{clock, Message, MessageHeader, MessageKind, StreamConfig};

/// Magic constant identifying an AudSync frame ("AUDS" in ASCII).
pub const MAGIC: u32 = 0x4155_4453;

/// Size of the fixed message header in bytes.
pub const HEADER_LEN: usize = 24;

/// Default TCP port the relay listens on.
pub const DEFAULT_PORT: u16 = 8080;

/// Upper bound on a single message payload.
///
/// Generous for any sane frame size (a 48 kHz stereo 10 ms frame is under
/// 4 KiB); anything larger indicates a corrupt or hostile length field.
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;
