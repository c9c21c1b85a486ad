//! Speaker playback.
//!
//! `RenderSink` owns the output device stream and fills every device
//! callback with pulled audio, queued audio, or silence. Two sourcing
//! modes exist and are mutually exclusive per stream:
//!
//! - **Pull mode**: a request callback registered at wire-up produces up
//!   to N samples per device callback (the jitter-buffered receive path).
//! - **Push mode**: audio posted through [`RenderSink::queue_audio`] is
//!   drained FIFO, bounded by `max_queue_ms`; when the bound is exceeded
//!   the oldest samples are dropped to keep live latency bounded.
//!
//! Gain and mute are applied per callback, followed by the soft-clip
//! limiter. Pausing only lifts the processing flag: the device stream
//! keeps running and emits silence, avoiding restart latency on resume.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use tracing::{debug, info, warn};

use audsync_stream_core::filters::soft_clip_block;

use crate::config::EndpointConfig;
use crate::device::resolve_output_device;
use crate::error::{EndpointError, Result};
use crate::events::{EndpointEvent, EventSender};

/// Callback producing samples on demand (pull mode).
///
/// Fills up to `out.len()` samples and returns how many were written.
/// Invoked on the render device's real-time thread.
pub type AudioRequestFn = Box<dyn FnMut(&mut [f32]) -> usize + Send>;

/// Playback lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SinkState {
    /// No device opened.
    Uninitialized = 0,
    /// Device closed, ready to start.
    Stopped = 1,
    /// Stream running and processing.
    Playing = 2,
    /// Stream running, emitting silence.
    Paused = 3,
}

impl SinkState {
    fn from_u8(value: u8) -> SinkState {
        match value {
            1 => SinkState::Stopped,
            2 => SinkState::Playing,
            3 => SinkState::Paused,
            _ => SinkState::Uninitialized,
        }
    }

    fn name(self) -> &'static str {
        match self {
            SinkState::Uninitialized => "uninitialized",
            SinkState::Stopped => "stopped",
            SinkState::Playing => "playing",
            SinkState::Paused => "paused",
        }
    }
}

/// Playback statistics.
#[derive(Debug, Clone, Default)]
pub struct RenderSinkStats {
    /// Samples written to the device.
    pub samples_played: u64,
    /// Device callbacks that ran short of audio.
    pub underruns: u64,
    /// Samples dropped from the push queue by the latency bound.
    pub dropped_samples: u64,
    /// Samples currently queued (push mode).
    pub queued_samples: usize,
    /// Queued audio expressed in milliseconds.
    pub queued_ms: u64,
    /// Current gain.
    pub volume: f32,
    /// Whether output is muted.
    pub muted: bool,
    /// Whether playback is active (not paused).
    pub is_playing: bool,
}

struct QueuedBlock {
    samples: Vec<f32>,
    cursor: usize,
}

#[derive(Default)]
struct PlaybackQueue {
    blocks: VecDeque<QueuedBlock>,
    queued_samples: usize,
}

pub(crate) struct SinkShared {
    state: AtomicU8,
    processing_active: AtomicBool,
    muted: AtomicBool,
    volume_bits: AtomicU32,
    queue: Mutex<PlaybackQueue>,
    request: Mutex<Option<AudioRequestFn>>,
    max_queue_samples: usize,
    sample_rate: u32,
    channels: u16,
    samples_played: AtomicU64,
    underruns: AtomicU64,
    in_underrun: AtomicBool,
    dropped_samples: AtomicU64,
    events: EventSender,
}

impl SinkShared {
    /// Fill one device buffer. This is the whole real-time render path.
    fn fill(&self, out: &mut [f32]) {
        let state = SinkState::from_u8(self.state.load(Ordering::Relaxed));
        if state != SinkState::Playing || !self.processing_active.load(Ordering::Relaxed) {
            out.fill(0.0);
            return;
        }
        if self.muted.load(Ordering::Relaxed) {
            out.fill(0.0);
            return;
        }

        let written = {
            let mut request = self.request.lock().unwrap_or_else(|e| e.into_inner());
            match request.as_mut() {
                Some(callback) => callback(out),
                None => self.drain_queue(out),
            }
        };

        if written < out.len() {
            out[written..].fill(0.0);
            self.note_underrun();
        } else {
            self.in_underrun.store(false, Ordering::Relaxed);
        }

        self.apply_gain(&mut out[..written]);
        self.samples_played
            .fetch_add(written as u64, Ordering::Relaxed);
    }

    fn drain_queue(&self, out: &mut [f32]) -> usize {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let mut written = 0;
        while written < out.len() {
            let (copied, exhausted) = match queue.blocks.front_mut() {
                None => break,
                Some(front) => {
                    let remaining = &front.samples[front.cursor..];
                    let n = remaining.len().min(out.len() - written);
                    out[written..written + n].copy_from_slice(&remaining[..n]);
                    front.cursor += n;
                    (n, front.cursor >= front.samples.len())
                }
            };
            written += copied;
            queue.queued_samples -= copied;
            if exhausted {
                queue.blocks.pop_front();
            }
        }
        written
    }

    fn apply_gain(&self, samples: &mut [f32]) {
        let gain = f32::from_bits(self.volume_bits.load(Ordering::Relaxed));
        if gain != 1.0 {
            for sample in samples.iter_mut() {
                *sample *= gain;
            }
        }
        soft_clip_block(samples);
    }

    fn note_underrun(&self) {
        let total = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.in_underrun.swap(true, Ordering::Relaxed) {
            let _ = self.events.send(EndpointEvent::Underrun { total });
        }
    }

    fn queue_audio(&self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return false;
        }
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        // Drop oldest blocks until the new batch fits under the bound.
        while !queue.blocks.is_empty()
            && queue.queued_samples + samples.len() > self.max_queue_samples
        {
            if let Some(front) = queue.blocks.pop_front() {
                let dropped = front.samples.len() - front.cursor;
                queue.queued_samples -= dropped;
                self.dropped_samples
                    .fetch_add(dropped as u64, Ordering::Relaxed);
            }
        }
        queue.blocks.push_back(QueuedBlock {
            samples: samples.to_vec(),
            cursor: 0,
        });
        queue.queued_samples += samples.len();
        true
    }

    fn queued_samples(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queued_samples
    }
}

/// Owns the output audio device and renders pulled or queued audio.
pub struct RenderSink {
    device_name: Option<String>,
    sample_rate: u32,
    channels: u16,
    frames_per_buffer: u32,
    shared: Arc<SinkShared>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl RenderSink {
    /// Create a render sink for the configured output device.
    pub fn new(config: &EndpointConfig, events: EventSender) -> Self {
        let max_queue_samples = (config.render.max_queue_ms as u64
            * config.sample_rate as u64
            * config.channels as u64
            / 1000) as usize;
        let shared = Arc::new(SinkShared {
            state: AtomicU8::new(SinkState::Uninitialized as u8),
            processing_active: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            volume_bits: AtomicU32::new(config.render.initial_volume.to_bits()),
            queue: Mutex::new(PlaybackQueue::default()),
            request: Mutex::new(None),
            max_queue_samples: max_queue_samples.max(1),
            sample_rate: config.sample_rate,
            channels: config.channels,
            samples_played: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            in_underrun: AtomicBool::new(false),
            dropped_samples: AtomicU64::new(0),
            events,
        });
        Self {
            device_name: config.output_device.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            frames_per_buffer: config.frames_per_buffer,
            shared,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Register the pull-mode request callback.
    ///
    /// Registering a callback puts the sink in pull mode; the push queue
    /// is no longer consulted.
    pub fn set_request_callback(&self, callback: AudioRequestFn) {
        let mut request = self
            .shared
            .request
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *request = Some(callback);
    }

    /// Queue audio for playback (push mode).
    ///
    /// Honors the `max_queue_ms` bound by dropping the oldest queued
    /// samples until the new batch fits.
    pub fn queue_audio(&self, samples: &[f32], _timestamp: u64) -> bool {
        if SinkState::from_u8(self.shared.state.load(Ordering::Relaxed)) == SinkState::Uninitialized
        {
            return false;
        }
        self.shared.queue_audio(samples)
    }

    /// Drop all queued audio.
    pub fn clear_queue(&self) {
        let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.blocks.clear();
        queue.queued_samples = 0;
    }

    /// Open the device and start the stream.
    pub fn start(&mut self) -> Result<()> {
        let state = SinkState::from_u8(self.shared.state.load(Ordering::SeqCst));
        if state == SinkState::Playing || state == SinkState::Paused {
            return Ok(());
        }

        let device = resolve_output_device(self.device_name.as_deref())?;
        let device_label = device.name().unwrap_or_else(|_| "<unknown>".to_string());

        let stream_config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.frames_per_buffer),
        };

        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);
        running.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let worker = std::thread::Builder::new()
            .name("audsync-render".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &stream_config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        shared.fill(out);
                    },
                    move |err| {
                        warn!("render stream error: {err}");
                    },
                    None,
                );

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(EndpointError::StreamOpen {
                            reason: e.to_string(),
                        }));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(EndpointError::StreamStart {
                        reason: e.to_string(),
                    }));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                debug!("render stream thread exiting");
            })
            .map_err(|e| EndpointError::StreamOpen {
                reason: e.to_string(),
            })?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.worker = Some(worker);
                self.shared
                    .state
                    .store(SinkState::Playing as u8, Ordering::SeqCst);
                self.shared.processing_active.store(true, Ordering::SeqCst);
                info!(
                    device = %device_label,
                    sample_rate = self.sample_rate,
                    channels = self.channels,
                    "playback started"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = worker.join();
                Err(EndpointError::StreamStart {
                    reason: "timed out waiting for render stream".to_string(),
                })
            }
        }
    }

    /// Stop the stream and close the device.
    pub fn stop(&mut self) {
        let state = SinkState::from_u8(self.shared.state.load(Ordering::SeqCst));
        if state != SinkState::Playing && state != SinkState::Paused {
            return;
        }
        self.shared.processing_active.store(false, Ordering::SeqCst);
        self.shared
            .state
            .store(SinkState::Stopped as u8, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.clear_queue();
        info!("playback stopped");
    }

    /// Pause playback, keeping the device stream running on silence.
    pub fn pause(&self) -> Result<()> {
        let state = SinkState::from_u8(self.shared.state.load(Ordering::SeqCst));
        if state != SinkState::Playing {
            return Err(EndpointError::InvalidState {
                expected: "playing",
                actual: state.name(),
            });
        }
        self.shared.processing_active.store(false, Ordering::SeqCst);
        self.shared
            .state
            .store(SinkState::Paused as u8, Ordering::SeqCst);
        Ok(())
    }

    /// Resume playback after a pause.
    pub fn resume(&self) -> Result<()> {
        let state = SinkState::from_u8(self.shared.state.load(Ordering::SeqCst));
        if state != SinkState::Paused {
            return Err(EndpointError::InvalidState {
                expected: "paused",
                actual: state.name(),
            });
        }
        self.shared
            .state
            .store(SinkState::Playing as u8, Ordering::SeqCst);
        self.shared.processing_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Set the output gain.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) || volume.is_nan() {
            return Err(EndpointError::InvalidVolume { value: volume });
        }
        self.shared
            .volume_bits
            .store(volume.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Current output gain.
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume_bits.load(Ordering::Relaxed))
    }

    /// Set or clear the mute flag.
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
    }

    /// Whether output is muted.
    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Relaxed)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SinkState {
        SinkState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Snapshot of playback counters.
    pub fn stats(&self) -> RenderSinkStats {
        let queued_samples = self.shared.queued_samples();
        let per_ms = self.shared.sample_rate as u64 * self.shared.channels as u64 / 1000;
        RenderSinkStats {
            samples_played: self.shared.samples_played.load(Ordering::Relaxed),
            underruns: self.shared.underruns.load(Ordering::Relaxed),
            dropped_samples: self.shared.dropped_samples.load(Ordering::Relaxed),
            queued_samples,
            queued_ms: if per_ms == 0 {
                0
            } else {
                queued_samples as u64 / per_ms
            },
            volume: self.volume(),
            muted: self.is_muted(),
            is_playing: self.state() == SinkState::Playing,
        }
    }

    #[cfg(test)]
    pub(crate) fn shared_for_tests(&self) -> Arc<SinkShared> {
        Arc::clone(&self.shared)
    }

    #[cfg(test)]
    pub(crate) fn force_state_for_tests(&self, state: SinkState) {
        self.shared.state.store(state as u8, Ordering::SeqCst);
        self.shared
            .processing_active
            .store(state == SinkState::Playing, Ordering::SeqCst);
    }
}

impl Drop for RenderSink {
    fn drop(&mut self) {
        self.stop();
    }
}
