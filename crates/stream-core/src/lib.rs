//! AudSync Stream Core
//!
//! Media plumbing shared by the endpoint pipeline: the non-blocking
//! sample ring that bridges device callbacks and worker tasks, the
//! sequence-ordered jitter buffer with loss concealment and adaptive
//! sizing, and the optional post-filter chain applied to pulled frames
//! before rendering.
//!
//! Everything in this crate is real-time aware: ring operations never
//! block and never allocate after construction, jitter buffer critical
//! sections are O(log n), and filter state lives in the filter instance
//! so multiple streams in one process never share state.

pub mod error;
pub mod filters;
pub mod frame;
pub mod jitter;
pub mod ring;

pub use error::{Result, StreamError};
pub use filters::{soft_clip, PostFilterChain, PostFilterConfig};
pub use frame::AudioFrame;
pub use jitter::{JitterBuffer, JitterConfig, JitterStats, ReceivedPacket};
pub use ring::SampleRing;
