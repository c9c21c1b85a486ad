//! Receive path: relay socket into the jitter buffer, out to the sink.
//!
//! The receive task reads framed messages off the socket. AUDIO_DATA is
//! decoded, validated against the endpoint's expected format, and
//! inserted into the jitter buffer; everything else is bookkeeping. A
//! framing error tears the connection down — the byte stream cannot be
//! resynchronized — and the controller decides whether to reconnect.
//!
//! The render sink pulls decoded frames through [`ReceiverShared::pull`],
//! which also drives jitter adaptation and timeout concealment, and runs
//! the optional post-filter chain on every delivered frame.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use audsync_stream_core::{JitterBuffer, JitterStats, PostFilterChain, ReceivedPacket};
use audsync_wire_core::{clock, framing, Message, MessageKind, WireError};

use crate::config::EndpointConfig;
use crate::error::Result;
use crate::events::{EndpointEvent, EventSender};

/// Why the receive task returned.
#[derive(Debug)]
pub enum ReceiverExit {
    /// Shutdown was requested.
    Shutdown,
    /// The socket failed or the stream framing broke.
    Error(WireError),
}

/// Receive statistics.
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    /// Jitter buffer counters.
    pub jitter: JitterStats,
    /// Packets dropped because their shape did not match the endpoint's
    /// expected format.
    pub format_mismatches: u64,
    /// Heartbeat echoes received back from the relay.
    pub heartbeat_echoes: u64,
    /// Whether the receive loop is attached to a live socket.
    pub is_receiving: bool,
}

/// State shared between the receive task, the pull side, and the
/// controller.
pub struct ReceiverShared {
    jitter: Mutex<JitterBuffer>,
    filters: Option<Mutex<PostFilterChain>>,
    expected_samples_per_frame: usize,
    sample_rate: u32,
    channels: u16,
    /// Whether the receive loop is attached to a live socket.
    pub receiving: AtomicBool,
    format_mismatches: AtomicU64,
    heartbeat_echoes: AtomicU64,
    ready_seen: AtomicBool,
    events: EventSender,
}

impl ReceiverShared {
    /// Build the shared receive state from the endpoint configuration.
    pub fn new(config: &EndpointConfig, events: EventSender) -> Result<Arc<Self>> {
        let jitter = JitterBuffer::new(config.jitter_config())?;
        let filters = config
            .enable_post_filters
            .then(|| Mutex::new(PostFilterChain::default()));
        Ok(Arc::new(Self {
            jitter: Mutex::new(jitter),
            filters,
            expected_samples_per_frame: config.samples_per_frame(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            receiving: AtomicBool::new(false),
            format_mismatches: AtomicU64::new(0),
            heartbeat_echoes: AtomicU64::new(0),
            ready_seen: AtomicBool::new(false),
            events,
        }))
    }

    /// Handle one decoded message from the socket.
    fn handle_message(&self, message: Message) {
        match message.kind {
            MessageKind::AudioData => self.handle_audio(message),
            MessageKind::Heartbeat => {
                self.heartbeat_echoes.fetch_add(1, Ordering::Relaxed);
                trace!("heartbeat echo received");
            }
            other => {
                debug!(kind = ?other, "ignoring unexpected message from relay");
            }
        }
    }

    fn handle_audio(&self, message: Message) {
        let samples = match message.audio_samples() {
            Ok(samples) => samples,
            Err(e) => {
                self.format_mismatches.fetch_add(1, Ordering::Relaxed);
                debug!("dropping malformed audio payload: {e}");
                return;
            }
        };

        // With raw-float payloads the sender's format shows up as the
        // frame shape: a peer on a different rate/channel count produces
        // frames of a different size, which are dropped here rather than
        // rendered at the wrong speed.
        if samples.len() != self.expected_samples_per_frame {
            self.format_mismatches.fetch_add(1, Ordering::Relaxed);
            debug!(
                got = samples.len(),
                expected = self.expected_samples_per_frame,
                "dropping audio frame with mismatched shape"
            );
            return;
        }

        let packet = ReceivedPacket {
            sequence: message.sequence,
            timestamp: message.timestamp,
            arrival_ms: clock::now_millis(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples,
            valid: true,
            concealed: false,
        };

        let ready = {
            let mut jitter = self.jitter.lock().unwrap_or_else(|e| e.into_inner());
            jitter.insert(packet);
            jitter.is_ready()
        };
        self.note_ready_transition(ready);
    }

    /// Pull the next frame for the render sink.
    ///
    /// Returns the number of samples written into `out`. Drives jitter
    /// adaptation and timeout concealment as a side effect, and applies
    /// the post-filter chain to delivered audio.
    pub fn pull(&self, out: &mut [f32]) -> usize {
        let now_ms = clock::now_millis();
        let (packet, ready, adapted_to) = {
            let mut jitter = self.jitter.lock().unwrap_or_else(|e| e.into_inner());
            let adapted = jitter.maybe_adapt(now_ms);
            let target = adapted.then(|| jitter.stats().target_buffer_ms);
            let packet = jitter.pop(now_ms);
            (packet, jitter.is_ready(), target)
        };

        if let Some(target_ms) = adapted_to {
            let _ = self.events.send(EndpointEvent::JitterAdapted { target_ms });
        }
        self.note_ready_transition(ready);

        let Some(packet) = packet else {
            return 0;
        };

        let n = packet.samples.len().min(out.len());
        out[..n].copy_from_slice(&packet.samples[..n]);

        if let Some(filters) = &self.filters {
            filters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .process(&mut out[..n]);
        }
        n
    }

    fn note_ready_transition(&self, ready: bool) {
        let was = self.ready_seen.swap(ready, Ordering::Relaxed);
        if ready && !was {
            let _ = self.events.send(EndpointEvent::JitterReady);
        } else if !ready && was {
            let _ = self.events.send(EndpointEvent::Rebuffering);
        }
    }

    /// Reset the jitter buffer and filter state, e.g. around reconnects.
    pub fn reset(&self) {
        self.jitter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(filters) = &self.filters {
            filters.lock().unwrap_or_else(|e| e.into_inner()).reset();
        }
    }

    /// Snapshot of receive counters.
    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            jitter: self
                .jitter
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .stats(),
            format_mismatches: self.format_mismatches.load(Ordering::Relaxed),
            heartbeat_echoes: self.heartbeat_echoes.load(Ordering::Relaxed),
            is_receiving: self.receiving.load(Ordering::Relaxed),
        }
    }
}

/// Drive the receive loop until shutdown or a connection error.
pub async fn run_receiver<R>(
    mut reader: R,
    shared: Arc<ReceiverShared>,
    mut shutdown: watch::Receiver<bool>,
) -> ReceiverExit
where
    R: AsyncRead + Unpin,
{
    shared.receiving.store(true, Ordering::SeqCst);

    let exit = loop {
        tokio::select! {
            result = framing::read_message(&mut reader) => {
                match result {
                    Ok(message) => shared.handle_message(message),
                    Err(e) => {
                        if e.is_framing_fatal() {
                            warn!("receive path failed: {e}");
                        } else {
                            debug!("dropping undecodable message: {e}");
                            continue;
                        }
                        break ReceiverExit::Error(e);
                    }
                }
            }
            _ = shutdown.changed() => {
                break ReceiverExit::Shutdown;
            }
        }
    };

    shared.receiving.store(false, Ordering::SeqCst);
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use audsync_wire_core::framing::write_message;
    use tokio::sync::mpsc::unbounded_channel;

    fn shared_with_config(min_packets: usize) -> Arc<ReceiverShared> {
        let (events, _rx) = unbounded_channel();
        let mut config = EndpointConfig::default();
        config.jitter.min_packets = min_packets;
        config.jitter.packet_timeout_ms = 50;
        ReceiverShared::new(&config, events).unwrap()
    }

    fn audio_message(sequence: u32, value: f32) -> Message {
        Message::audio(sequence, sequence as u64 * 5805, &[value; 256])
    }

    #[tokio::test]
    async fn audio_flows_into_the_jitter_buffer() {
        let shared = shared_with_config(2);
        let (mut tx, rx) = tokio::io::duplex(65536);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_receiver(rx, Arc::clone(&shared), shutdown_rx));

        for seq in 1u32..=3 {
            write_message(&mut tx, &audio_message(seq, 0.5)).await.unwrap();
        }

        // Wait for the three packets to land.
        for _ in 0..50 {
            if shared.stats().jitter.packets_received == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(shared.stats().jitter.packets_received, 3);
        assert!(shared.stats().jitter.is_ready);

        let mut out = vec![0.0f32; 256];
        assert_eq!(shared.pull(&mut out), 256);
        assert!((out[0] - 0.5).abs() < 1e-6);

        drop(tx);
        let exit = handle.await.unwrap();
        assert!(matches!(exit, ReceiverExit::Error(WireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn mismatched_frame_shape_is_dropped() {
        let shared = shared_with_config(2);
        let (mut tx, rx) = tokio::io::duplex(65536);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_receiver(rx, Arc::clone(&shared), shutdown_rx));

        // A stereo 48 kHz peer would produce a different frame size.
        let wrong = Message::audio(1, 0, &[0.5; 960]);
        write_message(&mut tx, &wrong).await.unwrap();
        write_message(&mut tx, &audio_message(2, 0.1)).await.unwrap();

        for _ in 0..50 {
            if shared.stats().jitter.packets_received == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let stats = shared.stats();
        assert_eq!(stats.format_mismatches, 1);
        assert_eq!(stats.jitter.packets_received, 1);

        drop(tx);
        let _ = handle.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_echo_is_counted_not_buffered() {
        let shared = shared_with_config(2);
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_receiver(rx, Arc::clone(&shared), shutdown_rx));

        write_message(&mut tx, &Message::heartbeat(1)).await.unwrap();
        for _ in 0..50 {
            if shared.stats().heartbeat_echoes == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(shared.stats().heartbeat_echoes, 1);
        assert_eq!(shared.stats().jitter.packets_received, 0);

        drop(tx);
        let _ = handle.await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_framing_ends_the_task() {
        let shared = shared_with_config(2);
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_receiver(rx, Arc::clone(&shared), shutdown_rx));

        let mut bytes = Message::heartbeat(0).encode().to_vec();
        bytes[0] = 0x00;
        use tokio::io::AsyncWriteExt;
        tx.write_all(&bytes).await.unwrap();
        tx.flush().await.unwrap();

        let exit = handle.await.unwrap();
        assert!(matches!(exit, ReceiverExit::Error(_)));
        assert!(!shared.receiving.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_ends_the_task() {
        let shared = shared_with_config(2);
        let (_tx, rx) = tokio::io::duplex(4096);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_receiver(rx, Arc::clone(&shared), shutdown_rx));

        shutdown_tx.send(true).unwrap();
        let exit = handle.await.unwrap();
        assert!(matches!(exit, ReceiverExit::Shutdown));
    }
}
