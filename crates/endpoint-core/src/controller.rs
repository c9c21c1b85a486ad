//! Endpoint controller.
//!
//! Wires CaptureSource → CaptureSink and RenderSource → RenderSink, owns
//! the relay link supervisor, and exposes the control surface the command
//! shell drives: start/stop streaming, volume, mute, stats, recording and
//! session logging toggles, disconnect, shutdown.
//!
//! The link supervisor runs one connection epoch at a time: connect and
//! handshake, then the transmit and receive tasks side by side. When
//! either side fails the epoch ends, buffers are cleared so no stale
//! audio survives, and bounded reconnection begins. A deliberate
//! disconnect ends the supervisor entirely.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use audsync_stream_core::SampleRing;
use audsync_wire_core::StreamConfig;

use crate::capture::{CaptureHandler, CaptureSource, CaptureStats};
use crate::config::{EndpointConfig, NetSettings};
use crate::error::{EndpointError, Result};
use crate::events::{EndpointEvent, EventSender};
use crate::logger::SessionLogger;
use crate::net::receiver::{run_receiver, ReceiverExit, ReceiverShared, ReceiverStats};
use crate::net::sender::{SenderExit, SenderShared, SenderStats, SenderTask};
use crate::net::connect_and_handshake;
use crate::recorder::WavRecorder;
use crate::render::{RenderSink, RenderSinkStats};

/// Aggregated statistics across the whole pipeline.
#[derive(Debug, Clone, Default)]
pub struct EndpointStats {
    /// Capture-side counters.
    pub capture: CaptureStats,
    /// Playback-side counters.
    pub render: RenderSinkStats,
    /// Transmit-side counters.
    pub sender: SenderStats,
    /// Receive-side counters.
    pub receiver: ReceiverStats,
}

/// The endpoint: one full capture → relay → render pipeline.
pub struct Endpoint {
    config: EndpointConfig,
    capture: CaptureSource,
    sink: RenderSink,
    receiver: Arc<ReceiverShared>,
    sender_shared: Arc<SenderShared>,
    capture_ring: Arc<SampleRing>,
    capture_notify: Arc<Notify>,
    recorder: Arc<Mutex<Option<WavRecorder>>>,
    session_log: Arc<SessionLogger>,
    events_tx: EventSender,
    events_rx: Option<mpsc::UnboundedReceiver<EndpointEvent>>,
    link_shutdown: Option<watch::Sender<bool>>,
    link_task: Option<JoinHandle<()>>,
}

impl Endpoint {
    /// Build and wire the pipeline. Devices are not opened yet and no
    /// connection is made; see [`connect`](Self::connect) and
    /// [`start`](Self::start).
    pub fn new(config: EndpointConfig) -> Result<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let capture_ring = Arc::new(SampleRing::new(config.capture_ring_samples()));
        let capture_notify = Arc::new(Notify::new());

        let handler: CaptureHandler = {
            let ring = Arc::clone(&capture_ring);
            let notify = Arc::clone(&capture_notify);
            let events = events_tx.clone();
            let overflows = AtomicU64::new(0);
            Arc::new(move |samples: &[f32], _timestamp: u64| {
                let accepted = ring.write(samples);
                if !accepted {
                    let total = overflows.fetch_add(1, Ordering::Relaxed) + 1;
                    // Rate-limited so a persistently stalled sender does
                    // not flood the event channel from the audio thread.
                    if total == 1 || total % 500 == 0 {
                        let _ = events.send(EndpointEvent::CaptureOverflow { total });
                    }
                }
                notify.notify_one();
                accepted
            })
        };

        let capture = CaptureSource::new(&config, handler);
        let sink = RenderSink::new(&config, events_tx.clone());
        let receiver = ReceiverShared::new(&config, events_tx.clone())?;

        // Render pulls straight out of the jitter-buffered receive path.
        {
            let receiver = Arc::clone(&receiver);
            sink.set_request_callback(Box::new(move |out: &mut [f32]| receiver.pull(out)));
        }

        Ok(Self {
            config,
            capture,
            sink,
            receiver,
            sender_shared: Arc::new(SenderShared::new()),
            capture_ring,
            capture_notify,
            recorder: Arc::new(Mutex::new(None)),
            session_log: Arc::new(SessionLogger::new()),
            events_tx,
            events_rx: Some(events_rx),
            link_shutdown: None,
            link_task: None,
        })
    }

    /// Connect to the relay, run the handshake, and start the link
    /// supervisor.
    ///
    /// The initial connection failure is returned to the caller; once a
    /// connection has been established, later drops are handled by
    /// bounded reconnection inside the supervisor.
    pub async fn connect(&mut self) -> Result<()> {
        if self.link_task.is_some() {
            debug!("connect called while link already up");
            return Ok(());
        }

        let stream_config = self.config.stream_config();
        let halves = connect_and_handshake(&self.config.net, stream_config).await?;
        let _ = self.events_tx.send(EndpointEvent::Connected {
            addr: self.config.net.addr(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let link = LinkSupervisor {
            settings: self.config.net.clone(),
            stream_config,
            frame_samples: self.config.samples_per_frame(),
            ring: Arc::clone(&self.capture_ring),
            notify: Arc::clone(&self.capture_notify),
            sender_shared: Arc::clone(&self.sender_shared),
            receiver: Arc::clone(&self.receiver),
            recorder: Arc::clone(&self.recorder),
            events: self.events_tx.clone(),
            shutdown: shutdown_rx,
        };
        self.link_shutdown = Some(shutdown_tx);
        self.link_task = Some(tokio::spawn(link.run(Some(halves))));
        Ok(())
    }

    /// Whether the relay link is currently up.
    pub fn is_connected(&self) -> bool {
        self.sender_shared.connected.load(Ordering::SeqCst)
    }

    /// Open the audio devices and begin streaming.
    pub fn start(&mut self) -> Result<()> {
        self.capture.start()?;
        if let Err(e) = self.sink.start() {
            self.capture.stop();
            return Err(e);
        }
        self.session_log.log("streaming started");
        Ok(())
    }

    /// Stop streaming and close the audio devices; the relay connection
    /// stays up.
    pub fn stop(&mut self) {
        self.capture.stop();
        self.sink.stop();
        self.capture_ring.clear();
        self.receiver.reset();
        self.session_log.log("streaming stopped");
    }

    /// Close the relay connection, keeping devices usable.
    pub async fn disconnect(&mut self) {
        if let Some(shutdown) = self.link_shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.link_task.take() {
            if let Err(e) = task.await {
                warn!("link supervisor panicked: {e}");
            }
        }
        self.capture_ring.clear();
        self.receiver.reset();
        self.session_log.log("disconnected from relay");
    }

    /// Orderly full shutdown: stop streaming, close the link, finalize
    /// the recorder and the session log.
    pub async fn shutdown(&mut self) {
        self.stop();
        self.disconnect().await;
        if let Err(e) = self.stop_recording() {
            debug!("recorder finalize during shutdown: {e}");
        }
        self.session_log.disable();
        info!("endpoint shut down");
    }

    /// Set the output gain in [0.0, 1.0].
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.sink.set_volume(volume)?;
        self.session_log.log(&format!("volume set to {volume:.2}"));
        Ok(())
    }

    /// Current output gain.
    pub fn volume(&self) -> f32 {
        self.sink.volume()
    }

    /// Set or clear the mute flag.
    pub fn set_muted(&self, muted: bool) {
        self.sink.set_muted(muted);
        self.session_log
            .log(if muted { "muted" } else { "unmuted" });
    }

    /// Whether output is muted.
    pub fn is_muted(&self) -> bool {
        self.sink.is_muted()
    }

    /// Begin recording the capture path to a WAV file.
    pub fn start_recording(&self, path: &Path) -> Result<()> {
        let recorder = WavRecorder::create(path, self.config.sample_rate, self.config.channels)?;
        let mut slot = self.recorder.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(EndpointError::Recorder {
                reason: "recording already in progress".to_string(),
            });
        }
        let _ = self.events_tx.send(EndpointEvent::RecordingStarted {
            path: recorder.path().to_string(),
        });
        self.session_log
            .log(&format!("recording started: {}", recorder.path()));
        *slot = Some(recorder);
        Ok(())
    }

    /// Stop and finalize the active recording, if any.
    pub fn stop_recording(&self) -> Result<()> {
        let recorder = {
            let mut slot = self.recorder.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(recorder) = recorder {
            recorder.finalize()?;
            let _ = self.events_tx.send(EndpointEvent::RecordingStopped);
            self.session_log.log("recording stopped");
        }
        Ok(())
    }

    /// Whether a recording is in progress.
    pub fn is_recording(&self) -> bool {
        self.recorder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Begin session logging to a text file.
    pub fn start_logging(&self, path: &Path) -> Result<()> {
        self.session_log.enable(path)
    }

    /// Stop session logging.
    pub fn stop_logging(&self) {
        self.session_log.disable();
    }

    /// The session logger, for event-pump integration.
    pub fn session_log(&self) -> Arc<SessionLogger> {
        Arc::clone(&self.session_log)
    }

    /// Take the event receiver; the caller owns event consumption.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<EndpointEvent>> {
        self.events_rx.take()
    }

    /// Snapshot of pipeline statistics.
    pub fn stats(&self) -> EndpointStats {
        EndpointStats {
            capture: self.capture.stats(),
            render: self.sink.stats(),
            sender: self.sender_shared.stats(),
            receiver: self.receiver.stats(),
        }
    }
}

type TcpHalves = (
    tokio::net::tcp::OwnedReadHalf,
    tokio::net::tcp::OwnedWriteHalf,
);

/// Owns one relay link across connection epochs.
struct LinkSupervisor {
    settings: NetSettings,
    stream_config: StreamConfig,
    frame_samples: usize,
    ring: Arc<SampleRing>,
    notify: Arc<Notify>,
    sender_shared: Arc<SenderShared>,
    receiver: Arc<ReceiverShared>,
    recorder: Arc<Mutex<Option<WavRecorder>>>,
    events: EventSender,
    shutdown: watch::Receiver<bool>,
}

impl LinkSupervisor {
    async fn run(mut self, mut established: Option<TcpHalves>) {
        let mut attempts: u32 = 0;

        loop {
            let halves = match established.take() {
                Some(halves) => halves,
                None => {
                    match connect_and_handshake(&self.settings, self.stream_config).await {
                        Ok(halves) => {
                            let _ = self.events.send(EndpointEvent::Connected {
                                addr: self.settings.addr(),
                            });
                            halves
                        }
                        Err(e) => {
                            attempts += 1;
                            let _ = self.events.send(EndpointEvent::ConnectFailed {
                                attempt: attempts,
                                reason: e.to_string(),
                            });
                            if attempts >= self.settings.max_reconnect_attempts {
                                let _ = self
                                    .events
                                    .send(EndpointEvent::ReconnectsExhausted { attempts });
                                warn!(attempts, "relay link terminally down");
                                return;
                            }
                            let delay = Duration::from_millis(self.settings.reconnect_delay_ms);
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => continue,
                                _ = self.shutdown.changed() => return,
                            }
                        }
                    }
                }
            };
            attempts = 0;

            let (read_half, write_half) = halves;
            // No stale audio crosses a connection epoch.
            self.ring.clear();
            self.receiver.reset();

            // The receiver ends via socket close or cancellation; only
            // the sender observes shutdown so the DISCONNECT message has
            // exactly one writer.
            let (receiver_gate_tx, receiver_gate_rx) = watch::channel(false);

            let sender_task = SenderTask {
                ring: Arc::clone(&self.ring),
                notify: Arc::clone(&self.notify),
                shared: Arc::clone(&self.sender_shared),
                frame_samples: self.frame_samples,
                heartbeat_interval: Duration::from_millis(self.settings.heartbeat_interval_ms),
                recorder: Arc::clone(&self.recorder),
                shutdown: self.shutdown.clone(),
            };

            let lost_reason = tokio::select! {
                exit = sender_task.run(write_half) => match exit {
                    SenderExit::Shutdown => {
                        let _ = self.events.send(EndpointEvent::Disconnected);
                        drop(receiver_gate_tx);
                        return;
                    }
                    SenderExit::Error(e) => e.to_string(),
                },
                exit = run_receiver(read_half, Arc::clone(&self.receiver), receiver_gate_rx) => {
                    match exit {
                        ReceiverExit::Shutdown => {
                            let _ = self.events.send(EndpointEvent::Disconnected);
                            return;
                        }
                        ReceiverExit::Error(e) => e.to_string(),
                    }
                }
            };
            drop(receiver_gate_tx);

            self.sender_shared.connected.store(false, Ordering::SeqCst);
            let _ = self.events.send(EndpointEvent::ConnectionLost {
                reason: lost_reason,
            });
            self.ring.clear();
            self.receiver.reset();
        }
    }
}
