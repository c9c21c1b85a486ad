//! Transmit path: captured frames onto the relay socket.
//!
//! The transmit task drains whole frames out of the capture ring whenever
//! the device callback signals new data, serializes each as AUDIO_DATA
//! with the next sequence number, and writes it fully to the socket.
//! When no audio has been sent for a heartbeat interval it emits a
//! HEARTBEAT instead, so the relay can tell a silent endpoint from a dead
//! one.
//!
//! The task does not buffer audio across disconnects: a dead socket ends
//! the task, the controller clears the ring while reconnecting, and
//! frames captured in the meantime are dropped. Live latency stays
//! bounded; stale audio is worthless.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::{watch, Notify};
use tracing::{debug, trace, warn};

use audsync_wire_core::{clock, framing, Message, WireError};

use crate::recorder::WavRecorder;

/// Why the transmit task returned.
#[derive(Debug)]
pub enum SenderExit {
    /// Shutdown was requested; a DISCONNECT was sent best-effort.
    Shutdown,
    /// The socket failed.
    Error(WireError),
}

/// State shared between the transmit task and the controller.
pub struct SenderShared {
    /// Whether the link currently accepts frames.
    pub connected: AtomicBool,
    sequence: AtomicU32,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    heartbeats_sent: AtomicU64,
    last_audio_ms: AtomicU64,
}

impl SenderShared {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            sequence: AtomicU32::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            last_audio_ms: AtomicU64::new(0),
        }
    }

    /// Snapshot of transmit counters.
    pub fn stats(&self) -> SenderStats {
        SenderStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            is_connected: self.connected.load(Ordering::Relaxed),
        }
    }
}

impl Default for SenderShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Transmit statistics.
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    /// AUDIO_DATA messages written.
    pub packets_sent: u64,
    /// Total bytes written, headers included.
    pub bytes_sent: u64,
    /// Heartbeats written.
    pub heartbeats_sent: u64,
    /// Whether the link is up.
    pub is_connected: bool,
}

/// Everything the transmit task needs for one connection epoch.
pub struct SenderTask {
    /// Capture ring shared with the device callback.
    pub ring: Arc<audsync_stream_core::SampleRing>,
    /// Signal that new capture data is available.
    pub notify: Arc<Notify>,
    /// Shared counters.
    pub shared: Arc<SenderShared>,
    /// Samples per frame.
    pub frame_samples: usize,
    /// Heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Recording tap; frames are mirrored into it when active.
    pub recorder: Arc<Mutex<Option<WavRecorder>>>,
    /// Shutdown signal shared with the controller.
    pub shutdown: watch::Receiver<bool>,
}

impl SenderTask {
    /// Drive the transmit loop until shutdown or socket failure.
    pub async fn run<W>(mut self, mut writer: W) -> SenderExit
    where
        W: AsyncWrite + Unpin,
    {
        self.shared.connected.store(true, Ordering::SeqCst);
        // Idle time is measured from link establishment, not process start.
        self.shared
            .last_audio_ms
            .store(clock::now_millis(), Ordering::Relaxed);
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut frame = vec![0.0f32; self.frame_samples];

        let exit = loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    if let Err(e) = self.drain_frames(&mut writer, &mut frame).await {
                        break SenderExit::Error(e);
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.maybe_heartbeat(&mut writer).await {
                        break SenderExit::Error(e);
                    }
                }
                _ = self.shutdown.changed() => {
                    let goodbye = Message::disconnect(clock::now_micros());
                    if let Err(e) = framing::write_message(&mut writer, &goodbye).await {
                        debug!("disconnect message failed: {e}");
                    }
                    break SenderExit::Shutdown;
                }
            }
        };

        self.shared.connected.store(false, Ordering::SeqCst);
        if let SenderExit::Error(ref e) = exit {
            warn!("transmit path failed: {e}");
        }
        exit
    }

    async fn drain_frames<W>(
        &mut self,
        writer: &mut W,
        frame: &mut [f32],
    ) -> Result<(), WireError>
    where
        W: AsyncWrite + Unpin,
    {
        while self.ring.available() >= self.frame_samples {
            self.ring.read(frame);

            {
                let mut recorder = self.recorder.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(rec) = recorder.as_mut() {
                    if let Err(e) = rec.write_samples(frame) {
                        warn!("recorder write failed, stopping recording: {e}");
                        *recorder = None;
                    }
                }
            }

            let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let message = Message::audio(sequence, clock::now_micros(), frame);
            framing::write_message(writer, &message).await?;

            self.shared.packets_sent.fetch_add(1, Ordering::Relaxed);
            self.shared
                .bytes_sent
                .fetch_add(message.total_len() as u64, Ordering::Relaxed);
            self.shared
                .last_audio_ms
                .store(clock::now_millis(), Ordering::Relaxed);
            trace!(sequence, "audio frame sent");
        }
        Ok(())
    }

    async fn maybe_heartbeat<W>(&mut self, writer: &mut W) -> Result<(), WireError>
    where
        W: AsyncWrite + Unpin,
    {
        let last_audio = self.shared.last_audio_ms.load(Ordering::Relaxed);
        let idle_ms = clock::now_millis().saturating_sub(last_audio);
        if idle_ms < self.heartbeat_interval.as_millis() as u64 {
            return Ok(());
        }
        framing::write_message(writer, &Message::heartbeat(clock::now_micros())).await?;
        self.shared.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        trace!("heartbeat sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audsync_stream_core::SampleRing;
    use audsync_wire_core::framing::read_message;
    use audsync_wire_core::MessageKind;

    fn task(
        ring: Arc<SampleRing>,
        frame_samples: usize,
        heartbeat: Duration,
    ) -> (SenderTask, Arc<Notify>, watch::Sender<bool>) {
        let notify = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = SenderTask {
            ring,
            notify: Arc::clone(&notify),
            shared: Arc::new(SenderShared::new()),
            frame_samples,
            heartbeat_interval: heartbeat,
            recorder: Arc::new(Mutex::new(None)),
            shutdown: shutdown_rx,
        };
        (task, notify, shutdown_tx)
    }

    #[tokio::test]
    async fn frames_are_sequenced_and_sent() {
        let ring = Arc::new(SampleRing::new(1024));
        let (task, notify, shutdown) = task(Arc::clone(&ring), 4, Duration::from_secs(60));
        let shared = Arc::clone(&task.shared);

        let (writer, mut reader) = tokio::io::duplex(65536);
        let handle = tokio::spawn(task.run(writer));

        for i in 0..3 {
            ring.write(&[i as f32; 4]);
            notify.notify_one();
        }

        for expected_seq in 1u32..=3 {
            let msg = read_message(&mut reader).await.unwrap();
            assert_eq!(msg.kind, MessageKind::AudioData);
            assert_eq!(msg.sequence, expected_seq);
            assert_eq!(
                msg.audio_samples().unwrap(),
                vec![(expected_seq - 1) as f32; 4]
            );
        }

        shutdown.send(true).unwrap();
        let exit = handle.await.unwrap();
        assert!(matches!(exit, SenderExit::Shutdown));
        assert_eq!(shared.stats().packets_sent, 3);
    }

    #[tokio::test]
    async fn disconnect_is_sent_on_shutdown() {
        let ring = Arc::new(SampleRing::new(64));
        let (task, _notify, shutdown) = task(ring, 4, Duration::from_secs(60));

        let (writer, mut reader) = tokio::io::duplex(4096);
        let handle = tokio::spawn(task.run(writer));

        shutdown.send(true).unwrap();
        let msg = read_message(&mut reader).await.unwrap();
        assert_eq!(msg.kind, MessageKind::Disconnect);

        let exit = handle.await.unwrap();
        assert!(matches!(exit, SenderExit::Shutdown));
    }

    #[tokio::test]
    async fn idle_link_sends_heartbeats() {
        let ring = Arc::new(SampleRing::new(64));
        let (task, _notify, shutdown) = task(ring, 4, Duration::from_millis(20));
        let shared = Arc::clone(&task.shared);

        let (writer, mut reader) = tokio::io::duplex(4096);
        let handle = tokio::spawn(task.run(writer));

        let msg = read_message(&mut reader).await.unwrap();
        assert_eq!(msg.kind, MessageKind::Heartbeat);

        shutdown.send(true).unwrap();
        let _ = handle.await.unwrap();
        assert!(shared.stats().heartbeats_sent >= 1);
    }

    #[tokio::test]
    async fn partial_frames_stay_in_the_ring() {
        let ring = Arc::new(SampleRing::new(64));
        let (task, notify, shutdown) = task(Arc::clone(&ring), 8, Duration::from_secs(60));
        let shared = Arc::clone(&task.shared);

        let (writer, _reader) = tokio::io::duplex(4096);
        let handle = tokio::spawn(task.run(writer));

        // Only half a frame: nothing must be transmitted.
        ring.write(&[0.5; 4]);
        notify.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shared.stats().packets_sent, 0);
        assert_eq!(ring.available(), 4);

        shutdown.send(true).unwrap();
        let _ = handle.await.unwrap();
    }
}
