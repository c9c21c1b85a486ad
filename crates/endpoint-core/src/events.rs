//! Pipeline events.
//!
//! Components report notable conditions through one unbounded event
//! channel registered at wire-up time. Events are informational: nothing
//! in the pipeline waits on their consumption, and none of them is fatal
//! by itself.

use std::fmt;

/// An event emitted by the endpoint pipeline.
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    /// The relay connection is established and the handshake completed.
    Connected {
        /// The relay address.
        addr: String,
    },
    /// A connection attempt failed.
    ConnectFailed {
        /// Which attempt this was.
        attempt: u32,
        /// The failure reason.
        reason: String,
    },
    /// An established connection was lost.
    ConnectionLost {
        /// The failure reason.
        reason: String,
    },
    /// The endpoint disconnected deliberately.
    Disconnected,
    /// Reconnect attempts are exhausted; the link is terminally down.
    ReconnectsExhausted {
        /// How many attempts were made.
        attempts: u32,
    },
    /// The render device requested more audio than was available.
    Underrun {
        /// Total underruns so far.
        total: u64,
    },
    /// The capture ring overflowed and samples were dropped.
    CaptureOverflow {
        /// Total dropped capture frames so far.
        total: u64,
    },
    /// The jitter buffer primed and playback can start.
    JitterReady,
    /// The jitter buffer drained and went back to priming.
    Rebuffering,
    /// The adaptive jitter target changed.
    JitterAdapted {
        /// The new target, in milliseconds.
        target_ms: u32,
    },
    /// A WAV recording started.
    RecordingStarted {
        /// Output file path.
        path: String,
    },
    /// The active WAV recording stopped.
    RecordingStopped,
}

impl fmt::Display for EndpointEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointEvent::Connected { addr } => write!(f, "connected to {addr}"),
            EndpointEvent::ConnectFailed { attempt, reason } => {
                write!(f, "connect attempt {attempt} failed: {reason}")
            }
            EndpointEvent::ConnectionLost { reason } => write!(f, "connection lost: {reason}"),
            EndpointEvent::Disconnected => write!(f, "disconnected"),
            EndpointEvent::ReconnectsExhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnect attempts")
            }
            EndpointEvent::Underrun { total } => write!(f, "playback underrun (total {total})"),
            EndpointEvent::CaptureOverflow { total } => {
                write!(f, "capture overflow (total {total})")
            }
            EndpointEvent::JitterReady => write!(f, "jitter buffer ready"),
            EndpointEvent::Rebuffering => write!(f, "rebuffering"),
            EndpointEvent::JitterAdapted { target_ms } => {
                write!(f, "jitter target adapted to {target_ms} ms")
            }
            EndpointEvent::RecordingStarted { path } => write!(f, "recording to {path}"),
            EndpointEvent::RecordingStopped => write!(f, "recording stopped"),
        }
    }
}

/// Shorthand for the event channel sender.
pub type EventSender = tokio::sync::mpsc::UnboundedSender<EndpointEvent>;
