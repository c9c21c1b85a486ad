//! AudSync Endpoint Core
//!
//! The full endpoint pipeline: microphone capture, wire transmission,
//! jitter-buffered reception, and speaker rendering, wired together by a
//! single controller.
//!
//! # Architecture
//!
//! Audio flows through four stages across three concurrency domains:
//!
//! ```text
//! capture device thread          tokio runtime               render device thread
//! ┌───────────────┐   ring    ┌─────────────┐    TCP    ┌─────────────┐
//! │ CaptureSource ├──────────►│ CaptureSink ├──────────►│    relay    │
//! └───────────────┘  +notify  └─────────────┘           └──────┬──────┘
//! ┌───────────────┐   pull    ┌──────────────┐    TCP          │
//! │  RenderSink   │◄──────────┤ RenderSource │◄────────────────┘
//! └───────────────┘           └──────────────┘
//! ```
//!
//! Device callbacks are real-time contexts: they only move samples
//! through the pre-allocated sample ring, touch atomics, and poke a
//! non-blocking notify channel. Everything that can block, allocate, or
//! do I/O runs on the tokio runtime.

pub mod capture;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod events;
pub mod logger;
pub mod net;
pub mod recorder;
pub mod render;

pub use capture::{CaptureSource, CaptureStats};
pub use config::{EndpointConfig, JitterTuning, NetSettings, RenderSettings};
pub use controller::{Endpoint, EndpointStats};
pub use error::{EndpointError, Result};
pub use events::EndpointEvent;
pub use render::{RenderSink, RenderSinkStats, SinkState};
