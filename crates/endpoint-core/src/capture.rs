//! Microphone capture.
//!
//! `CaptureSource` owns the input device stream. The cpal data callback
//! runs on the audio subsystem's real-time thread; it hands each
//! interleaved f32 block plus a monotonic timestamp to the handler
//! registered at wire-up, counts a drop when the handler could not accept
//! everything, and returns. No allocation, no blocking, no I/O.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated thread
//! for its whole lifetime; `start` and `stop` talk to that thread through
//! a startup result channel and the shared running flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use tracing::{debug, error, info, warn};

use audsync_wire_core::clock;

use crate::config::EndpointConfig;
use crate::device::resolve_input_device;
use crate::error::{EndpointError, Result};

/// Handler invoked on the device thread for every captured block.
///
/// Receives the interleaved samples and a monotonic microsecond
/// timestamp. Returns `false` when the block could not be accepted in
/// full; the source counts it as dropped.
pub type CaptureHandler = Arc<dyn Fn(&[f32], u64) -> bool + Send + Sync>;

/// Capture statistics.
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    /// Device callbacks observed.
    pub blocks_captured: u64,
    /// Samples handed to the handler.
    pub samples_captured: u64,
    /// Blocks the handler could not fully accept.
    pub blocks_dropped: u64,
    /// Stream errors reported by the driver.
    pub device_errors: u64,
    /// Whether the stream is currently running.
    pub is_capturing: bool,
}

#[derive(Default)]
struct CaptureShared {
    blocks_captured: AtomicU64,
    samples_captured: AtomicU64,
    blocks_dropped: AtomicU64,
    device_errors: AtomicU64,
}

/// Owns the input audio device and feeds captured blocks to a handler.
pub struct CaptureSource {
    device_name: Option<String>,
    sample_rate: u32,
    channels: u16,
    frames_per_buffer: u32,
    handler: CaptureHandler,
    running: Arc<AtomicBool>,
    shared: Arc<CaptureShared>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureSource {
    /// Create a capture source for the configured input device.
    ///
    /// The device itself is opened by [`start`](Self::start); creation
    /// only records the wiring.
    pub fn new(config: &EndpointConfig, handler: CaptureHandler) -> Self {
        Self {
            device_name: config.input_device.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            frames_per_buffer: config.frames_per_buffer,
            handler,
            running: Arc::new(AtomicBool::new(false)),
            shared: Arc::new(CaptureShared::default()),
            worker: None,
        }
    }

    /// Open the device and begin streaming.
    ///
    /// Fails if the device cannot be resolved, the stream cannot be
    /// built at the requested format, or playback cannot start.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = resolve_input_device(self.device_name.as_deref())?;
        let device_label = device.name().unwrap_or_else(|_| "<unknown>".to_string());

        let stream_config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.frames_per_buffer),
        };

        let running = Arc::clone(&self.running);
        let running_cb = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);
        let shared_err = Arc::clone(&self.shared);
        let handler = Arc::clone(&self.handler);

        running.store(true, Ordering::SeqCst);

        // The startup channel carries the build/play result back out of
        // the stream thread so start() can fail synchronously.
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let worker = std::thread::Builder::new()
            .name("audsync-capture".to_string())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }
                        shared.blocks_captured.fetch_add(1, Ordering::Relaxed);
                        shared
                            .samples_captured
                            .fetch_add(data.len() as u64, Ordering::Relaxed);
                        if !handler(data, clock::now_micros()) {
                            shared.blocks_dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    move |err| {
                        shared_err.device_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("capture stream error: {err}");
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

                // Keep the (!Send) stream alive on this thread until the
                // running flag drops.
                while running.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                debug!("capture stream thread exiting");
            })
            .map_err(|e| EndpointError::StreamOpen {
                reason: e.to_string(),
            })?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.worker = Some(worker);
                info!(
                    device = %device_label,
                    sample_rate = self.sample_rate,
                    channels = self.channels,
                    frames_per_buffer = self.frames_per_buffer,
                    "capture started"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = worker.join();
                error!("capture failed to start: {e}");
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = worker.join();
                Err(EndpointError::StreamStart {
                    reason: "timed out waiting for capture stream".to_string(),
                })
            }
        }
    }

    /// Stop streaming and close the device.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        info!("capture stopped");
    }

    /// Whether the stream is currently running.
    pub fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of capture counters.
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            blocks_captured: self.shared.blocks_captured.load(Ordering::Relaxed),
            samples_captured: self.shared.samples_captured.load(Ordering::Relaxed),
            blocks_dropped: self.shared.blocks_dropped.load(Ordering::Relaxed),
            device_errors: self.shared.device_errors.load(Ordering::Relaxed),
            is_capturing: self.is_capturing(),
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}
