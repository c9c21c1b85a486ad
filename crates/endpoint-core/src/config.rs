//! Endpoint configuration.
//!
//! The configuration is assembled before [`Endpoint::new`]
//! (crate::Endpoint::new) and immutable afterwards; components clone the
//! sections they need at wire-up time.

use audsync_stream_core::jitter::JitterConfig;
use audsync_wire_core::{StreamConfig, DEFAULT_PORT};

use crate::error::{EndpointError, Result};

/// Jitter buffer tuning, in the units the operator thinks in.
#[derive(Debug, Clone)]
pub struct JitterTuning {
    /// Packets required before playback starts.
    pub min_packets: usize,
    /// Hard bound on buffered packets.
    pub max_packets: usize,
    /// Lower bound for the adaptive target, in milliseconds.
    pub min_buffer_ms: u32,
    /// Upper bound for the adaptive target, in milliseconds.
    pub max_buffer_ms: u32,
    /// Initial adaptive target, in milliseconds.
    pub target_buffer_ms: u32,
    /// Missing-packet timeout before concealment, in milliseconds.
    pub packet_timeout_ms: u64,
    /// Spacing between adaptation passes, in milliseconds.
    pub adaptation_interval_ms: u64,
    /// Jitter level that triggers target growth, in milliseconds.
    pub jitter_threshold_ms: f64,
}

impl Default for JitterTuning {
    fn default() -> Self {
        Self {
            min_packets: 3,
            max_packets: 50,
            min_buffer_ms: 20,
            max_buffer_ms: 200,
            target_buffer_ms: 50,
            packet_timeout_ms: 100,
            adaptation_interval_ms: 1000,
            jitter_threshold_ms: 10.0,
        }
    }
}

/// Relay connection settings.
#[derive(Debug, Clone)]
pub struct NetSettings {
    /// Relay hostname or address.
    pub server_host: String,
    /// Relay TCP port.
    pub server_port: u16,
    /// Heartbeat interval when no audio is flowing, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Timeout for the TCP connect itself, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Reconnect attempts after an established connection drops.
    pub max_reconnect_attempts: u32,
    /// Delay between reconnect attempts, in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for NetSettings {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: DEFAULT_PORT,
            heartbeat_interval_ms: 5000,
            connect_timeout_ms: 10_000,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 2000,
        }
    }
}

impl NetSettings {
    /// The relay address in `host:port` form.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

/// Playback-side settings.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Bound on queued playback audio, in milliseconds.
    pub max_queue_ms: u32,
    /// Initial output gain in [0.0, 1.0].
    pub initial_volume: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_queue_ms: 200,
            initial_volume: 1.0,
        }
    }
}

/// Immutable endpoint configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Input device name; `None` selects the system default.
    pub input_device: Option<String>,
    /// Output device name; `None` selects the system default.
    pub output_device: Option<String>,
    /// Samples per second per channel.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Frames per buffer: the pipeline's scheduling unit.
    pub frames_per_buffer: u32,
    /// Capture ring capacity, in frames.
    pub capture_ring_frames: usize,
    /// Jitter buffer tuning.
    pub jitter: JitterTuning,
    /// Relay connection settings.
    pub net: NetSettings,
    /// Playback settings.
    pub render: RenderSettings,
    /// Whether the receive path runs the post-filter chain.
    pub enable_post_filters: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: 44_100,
            channels: 1,
            frames_per_buffer: 256,
            capture_ring_frames: 16,
            jitter: JitterTuning::default(),
            net: NetSettings::default(),
            render: RenderSettings::default(),
            enable_post_filters: false,
        }
    }
}

impl EndpointConfig {
    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.channels == 0 || self.frames_per_buffer == 0 {
            return Err(EndpointError::InvalidConfig {
                details: "sample_rate, channels and frames_per_buffer must be non-zero".into(),
            });
        }
        if self.capture_ring_frames < 2 {
            return Err(EndpointError::InvalidConfig {
                details: "capture_ring_frames must be at least 2".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.render.initial_volume) {
            return Err(EndpointError::InvalidVolume {
                value: self.render.initial_volume,
            });
        }
        self.jitter_config().validate()?;
        Ok(())
    }

    /// Samples in one frame (`frames_per_buffer × channels`).
    pub fn samples_per_frame(&self) -> usize {
        self.frames_per_buffer as usize * self.channels as usize
    }

    /// Capture ring capacity in samples.
    pub fn capture_ring_samples(&self) -> usize {
        self.samples_per_frame() * self.capture_ring_frames
    }

    /// The format this endpoint declares to the relay.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            sample_rate: self.sample_rate as i32,
            channels: self.channels as i32,
            frames_per_buffer: self.frames_per_buffer as i32,
        }
    }

    /// The jitter buffer configuration this endpoint runs with.
    pub fn jitter_config(&self) -> JitterConfig {
        JitterConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            frames_per_buffer: self.frames_per_buffer,
            min_packets: self.jitter.min_packets,
            max_packets: self.jitter.max_packets,
            min_buffer_ms: self.jitter.min_buffer_ms,
            max_buffer_ms: self.jitter.max_buffer_ms,
            target_buffer_ms: self.jitter.target_buffer_ms,
            packet_timeout_ms: self.jitter.packet_timeout_ms,
            adaptation_interval_ms: self.jitter.adaptation_interval_ms,
            jitter_threshold_ms: self.jitter.jitter_threshold_ms,
            ..JitterConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EndpointConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.samples_per_frame(), 256);
        assert_eq!(config.capture_ring_samples(), 4096);
    }

    #[test]
    fn rejects_out_of_range_volume() {
        let config = EndpointConfig {
            render: RenderSettings {
                initial_volume: 1.5,
                ..RenderSettings::default()
            },
            ..EndpointConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EndpointError::InvalidVolume { .. })
        ));
    }

    #[test]
    fn rejects_zero_rate() {
        let config = EndpointConfig {
            sample_rate: 0,
            ..EndpointConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn stream_config_matches_endpoint() {
        let config = EndpointConfig::default();
        let wire = config.stream_config();
        assert_eq!(wire.sample_rate, 44_100);
        assert_eq!(wire.channels, 1);
        assert_eq!(wire.frames_per_buffer, 256);
    }
}
