//! AudSync Relay Engine
//!
//! The relay is a pure fan-out: it accepts endpoint connections, tracks
//! each client's registration state and declared audio format, and
//! forwards every AUDIO_DATA frame byte-for-byte to every *other* ready
//! client. It never transcodes, mixes, or re-timestamps — when clients
//! run mutually different formats, rejecting a frame is the receiving
//! peer's responsibility.
//!
//! Per sender, forwarding preserves send order; across senders no
//! ordering is guaranteed. Heartbeats are echoed to their sender only.

pub mod error;
pub mod server;
pub mod session;
pub mod session_log;

pub use error::{RelayError, Result};
pub use server::{RelayConfig, RelayServer, RelayStats};
pub use session::{ClientPhase, ClientSummary, SessionTable};
