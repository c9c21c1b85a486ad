//! Sequence-ordered jitter buffer with loss concealment.
//!
//! Received audio packets are reordered by sequence number, deduplicated,
//! and delivered strictly in order. Small sequence gaps are filled with
//! silence placeholders at insert time; if the real packet shows up later
//! it replaces its placeholder, so plain reordering never costs audio.
//! Larger gaps are concealed on pull once the packet timeout has elapsed.
//! The buffer primes once it holds `min_packets` packets, then stays ready
//! until it has been empty for longer than the silence tolerance, at which
//! point it rebuffers and resynchronizes.
//!
//! Target sizing adapts to measured network jitter: an exponential moving
//! average of the difference between packet inter-arrival and inter-send
//! times grows or shrinks the target between the configured bounds.
//!
//! The buffer itself is single-owner; the receive path wraps it in one
//! mutex with O(log n) critical sections.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::error::{Result, StreamError};

/// Smoothing factor for the jitter moving average.
const JITTER_EMA_ALPHA: f64 = 0.1;

/// Step sizes for adaptive target resizing, in milliseconds.
const ADAPT_GROW_MS: u32 = 10;
const ADAPT_SHRINK_MS: u32 = 5;

/// A decoded audio packet as tracked by the jitter buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPacket {
    /// Per-sender sequence number; the buffer's ordering key.
    pub sequence: u32,
    /// Sender-side timestamp in microseconds.
    pub timestamp: u64,
    /// Local arrival time in milliseconds.
    pub arrival_ms: u64,
    /// Declared sample rate.
    pub sample_rate: u32,
    /// Declared channel count.
    pub channels: u16,
    /// Decoded interleaved samples.
    pub samples: Vec<f32>,
    /// Whether the packet passed validation.
    pub valid: bool,
    /// Whether this packet is synthesized silence standing in for a loss.
    pub concealed: bool,
}

impl ReceivedPacket {
    fn silence(config: &JitterConfig, sequence: u32, timestamp: u64, arrival_ms: u64) -> Self {
        ReceivedPacket {
            sequence,
            timestamp,
            arrival_ms,
            sample_rate: config.sample_rate,
            channels: config.channels,
            samples: vec![0.0; config.samples_per_frame()],
            valid: true,
            concealed: true,
        }
    }
}

/// Jitter buffer configuration.
#[derive(Debug, Clone)]
pub struct JitterConfig {
    /// Expected sample rate of the stream.
    pub sample_rate: u32,
    /// Expected channel count of the stream.
    pub channels: u16,
    /// Frames per buffer; sizes synthesized silence.
    pub frames_per_buffer: u32,
    /// Packets required before the buffer reports ready.
    pub min_packets: usize,
    /// Hard bound on buffered packets; the lowest is evicted beyond it.
    pub max_packets: usize,
    /// Lower bound for the adaptive target, in milliseconds.
    pub min_buffer_ms: u32,
    /// Upper bound for the adaptive target, in milliseconds.
    pub max_buffer_ms: u32,
    /// Initial adaptive target, in milliseconds.
    pub target_buffer_ms: u32,
    /// How long a missing packet may stall the stream before silence
    /// is emitted in its place.
    pub packet_timeout_ms: u64,
    /// Minimum spacing between adaptation passes.
    pub adaptation_interval_ms: u64,
    /// Average jitter above this grows the target; below half of it,
    /// the target shrinks.
    pub jitter_threshold_ms: f64,
    /// How long the buffer may sit empty before it rebuffers.
    pub silence_tolerance_ms: u64,
    /// Largest sequence gap filled with placeholders at insert time.
    pub max_gap_synthesis: u32,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            frames_per_buffer: 256,
            min_packets: 3,
            max_packets: 50,
            min_buffer_ms: 20,
            max_buffer_ms: 200,
            target_buffer_ms: 50,
            packet_timeout_ms: 100,
            adaptation_interval_ms: 1000,
            jitter_threshold_ms: 10.0,
            silence_tolerance_ms: 50,
            max_gap_synthesis: 3,
        }
    }
}

impl JitterConfig {
    /// Samples in one frame.
    pub fn samples_per_frame(&self) -> usize {
        self.frames_per_buffer as usize * self.channels as usize
    }

    /// Duration of one packet in milliseconds.
    pub fn packet_interval_ms(&self) -> f64 {
        self.frames_per_buffer as f64 / self.sample_rate as f64 * 1000.0
    }

    fn frame_duration_micros(&self) -> u64 {
        (self.frames_per_buffer as u64 * 1_000_000) / self.sample_rate as u64
    }

    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.channels == 0 || self.frames_per_buffer == 0 {
            return Err(StreamError::InvalidConfig {
                details: "sample_rate, channels and frames_per_buffer must be non-zero".into(),
            });
        }
        if self.max_buffer_ms <= self.min_buffer_ms {
            return Err(StreamError::InvalidConfig {
                details: format!(
                    "max_buffer_ms ({}) must exceed min_buffer_ms ({})",
                    self.max_buffer_ms, self.min_buffer_ms
                ),
            });
        }
        if self.target_buffer_ms < self.min_buffer_ms || self.target_buffer_ms > self.max_buffer_ms
        {
            return Err(StreamError::InvalidConfig {
                details: format!(
                    "target_buffer_ms ({}) must lie in [{}, {}]",
                    self.target_buffer_ms, self.min_buffer_ms, self.max_buffer_ms
                ),
            });
        }
        if self.min_packets == 0 || self.max_packets <= self.min_packets {
            return Err(StreamError::InvalidConfig {
                details: "max_packets must exceed min_packets (both non-zero)".into(),
            });
        }
        Ok(())
    }
}

/// Counters and gauges describing jitter buffer behavior.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JitterStats {
    /// Packets handed to [`JitterBuffer::insert`], duplicates included.
    pub packets_received: u64,
    /// Packets concealed as lost.
    pub packets_lost: u64,
    /// Packets discarded: evicted as too late, or stale on arrival.
    pub packets_dropped: u64,
    /// Packets delivered to the render path.
    pub packets_played: u64,
    /// Duplicate sequence numbers suppressed.
    pub duplicates: u64,
    /// Silence frames synthesized for missing sequences.
    pub silence_inserted: u64,
    /// Packets currently buffered.
    pub buffered_packets: usize,
    /// Exponential moving average of network jitter, in milliseconds.
    pub average_jitter_ms: f64,
    /// Current adaptive target, in milliseconds.
    pub target_buffer_ms: u32,
    /// Whether the buffer is primed for playback.
    pub is_ready: bool,
    /// Next sequence the pull side expects.
    pub expected_sequence: u32,
    /// Highest sequence observed so far.
    pub highest_sequence: u32,
}

/// Sequence-ordered packet reassembly with loss concealment.
pub struct JitterBuffer {
    config: JitterConfig,
    buffer: BTreeMap<u32, ReceivedPacket>,
    last_inserted: Option<u32>,
    highest_seen: u32,
    next_expected: Option<u32>,
    ready: bool,
    empty_since_ms: Option<u64>,
    last_arrival_ms: u64,
    last_delivered_timestamp: u64,
    prev_arrival: Option<(u64, u64)>,
    average_jitter_ms: f64,
    target_buffer_ms: u32,
    min_packets: usize,
    last_adaptation_ms: Option<u64>,
    packets_received: u64,
    packets_lost: u64,
    packets_dropped: u64,
    packets_played: u64,
    duplicates: u64,
    silence_inserted: u64,
}

impl JitterBuffer {
    /// Create a jitter buffer with the given configuration.
    pub fn new(config: JitterConfig) -> Result<Self> {
        config.validate()?;
        let target_buffer_ms = config.target_buffer_ms;
        let min_packets = config.min_packets;
        Ok(Self {
            config,
            buffer: BTreeMap::new(),
            last_inserted: None,
            highest_seen: 0,
            next_expected: None,
            ready: false,
            empty_since_ms: None,
            last_arrival_ms: 0,
            last_delivered_timestamp: 0,
            prev_arrival: None,
            average_jitter_ms: 0.0,
            target_buffer_ms,
            min_packets,
            last_adaptation_ms: None,
            packets_received: 0,
            packets_lost: 0,
            packets_dropped: 0,
            packets_played: 0,
            duplicates: 0,
            silence_inserted: 0,
        })
    }

    /// Insert a received packet.
    ///
    /// Duplicates and packets older than the pull position are dropped. A
    /// sequence gap of at most `max_gap_synthesis` behind the new packet
    /// is filled with silence placeholders immediately; a reordered real
    /// packet arriving afterwards replaces its placeholder. When the
    /// buffer is full the lowest sequence is evicted, since it is the one
    /// closest to its play deadline.
    pub fn insert(&mut self, packet: ReceivedPacket) {
        self.packets_received += 1;
        self.update_jitter(packet.arrival_ms, packet.timestamp);
        self.last_arrival_ms = packet.arrival_ms;

        if packet.sequence > self.highest_seen {
            self.highest_seen = packet.sequence;
        }

        let buffered_placeholder = self
            .buffer
            .get(&packet.sequence)
            .map(|buffered| buffered.concealed);
        match buffered_placeholder {
            Some(true) if !packet.concealed => {
                // The real packet beat its placeholder to the pull side.
                trace!(sequence = packet.sequence, "real packet replaced silence placeholder");
                self.buffer.insert(packet.sequence, packet);
                self.silence_inserted = self.silence_inserted.saturating_sub(1);
                self.packets_lost = self.packets_lost.saturating_sub(1);
                return;
            }
            Some(_) => {
                self.duplicates += 1;
                trace!(sequence = packet.sequence, "duplicate packet suppressed");
                return;
            }
            None => {}
        }
        if let Some(expected) = self.next_expected {
            if packet.sequence < expected {
                self.packets_dropped += 1;
                trace!(
                    sequence = packet.sequence,
                    expected,
                    "stale packet behind pull position"
                );
                return;
            }
        }

        self.synthesize_gap(&packet);

        while self.buffer.len() >= self.config.max_packets {
            if let Some((sequence, _)) = self.buffer.pop_first() {
                self.packets_dropped += 1;
                debug!(sequence, "buffer full, evicted oldest packet");
            }
        }

        self.last_inserted = Some(packet.sequence);
        self.buffer.insert(packet.sequence, packet);
        self.empty_since_ms = None;

        if !self.ready && self.buffer.len() >= self.min_packets {
            self.ready = true;
            debug!(buffered = self.buffer.len(), "jitter buffer primed");
        }
    }

    fn synthesize_gap(&mut self, packet: &ReceivedPacket) {
        let last = match self.last_inserted {
            Some(last) => last,
            None => return,
        };
        if packet.sequence <= last + 1 {
            return;
        }
        let gap = packet.sequence - last - 1;
        if gap > self.config.max_gap_synthesis {
            debug!(gap, after = last, "large sequence gap, deferring to pull-side concealment");
            return;
        }

        let frame_us = self.config.frame_duration_micros();
        for missing in (last + 1)..packet.sequence {
            if self.buffer.contains_key(&missing) {
                continue;
            }
            let offset = (packet.sequence - missing) as u64 * frame_us;
            let timestamp = packet.timestamp.saturating_sub(offset);
            let silence =
                ReceivedPacket::silence(&self.config, missing, timestamp, packet.arrival_ms);
            self.buffer.insert(missing, silence);
            self.silence_inserted += 1;
            self.packets_lost += 1;
            trace!(sequence = missing, "synthesized silence for gap");
        }
    }

    /// Pull the next packet in sequence order.
    ///
    /// Returns `None` while the buffer is priming, rebuffering, or waiting
    /// out a missing packet that has not yet timed out. When the expected
    /// sequence is missing and `packet_timeout_ms` has elapsed since the
    /// last arrival, a concealment silence frame is emitted in its place.
    pub fn pop(&mut self, now_ms: u64) -> Option<ReceivedPacket> {
        if !self.ready {
            return None;
        }

        loop {
            let top_sequence = match self.buffer.first_key_value() {
                Some((&sequence, _)) => sequence,
                None => return self.pop_empty(now_ms),
            };
            self.empty_since_ms = None;

            let expected = *self.next_expected.get_or_insert(top_sequence);

            if top_sequence < expected {
                // Behind the pull position; cannot be played anymore.
                self.buffer.pop_first();
                self.packets_dropped += 1;
                continue;
            }

            if top_sequence == expected {
                let (_, packet) = self.buffer.pop_first()?;
                self.next_expected = Some(expected.wrapping_add(1));
                self.packets_played += 1;
                self.last_delivered_timestamp = packet.timestamp;
                return Some(packet);
            }

            // Expected sequence missing.
            return self.conceal_if_timed_out(expected, now_ms);
        }
    }

    fn pop_empty(&mut self, now_ms: u64) -> Option<ReceivedPacket> {
        // An empty buffer is an underrun, not a loss: the render side pads
        // silence on its own, so nothing is concealed here. Concealment
        // only ever skips a hole in front of a packet that is actually
        // waiting to be played.
        match self.empty_since_ms {
            None => {
                self.empty_since_ms = Some(now_ms);
            }
            Some(since) if now_ms.saturating_sub(since) > self.config.silence_tolerance_ms => {
                // Drained past the tolerance: rebuffer and resynchronize
                // on whatever sequence arrives next.
                self.ready = false;
                self.empty_since_ms = None;
                self.next_expected = None;
                self.last_inserted = None;
                debug!("jitter buffer drained past silence tolerance, rebuffering");
            }
            Some(_) => {}
        }
        None
    }

    fn conceal_if_timed_out(&mut self, expected: u32, now_ms: u64) -> Option<ReceivedPacket> {
        if now_ms.saturating_sub(self.last_arrival_ms) < self.config.packet_timeout_ms {
            return None;
        }
        let timestamp = self
            .last_delivered_timestamp
            .saturating_add(self.config.frame_duration_micros());
        let silence = ReceivedPacket::silence(&self.config, expected, timestamp, now_ms);
        self.next_expected = Some(expected.wrapping_add(1));
        self.silence_inserted += 1;
        self.packets_lost += 1;
        self.packets_played += 1;
        self.last_delivered_timestamp = timestamp;
        debug!(sequence = expected, "packet timed out, emitting concealment silence");
        Some(silence)
    }

    fn update_jitter(&mut self, arrival_ms: u64, timestamp_us: u64) {
        if let Some((prev_arrival_ms, prev_timestamp_us)) = self.prev_arrival {
            let arrival_delta = arrival_ms.abs_diff(prev_arrival_ms) as f64;
            let send_delta = timestamp_us.abs_diff(prev_timestamp_us) as f64 / 1000.0;
            let jitter = (arrival_delta - send_delta).abs();
            self.average_jitter_ms =
                self.average_jitter_ms * (1.0 - JITTER_EMA_ALPHA) + jitter * JITTER_EMA_ALPHA;
        }
        self.prev_arrival = Some((arrival_ms, timestamp_us));
    }

    /// Run one adaptation pass if the adaptation interval has elapsed.
    ///
    /// Returns `true` when the target size changed.
    pub fn maybe_adapt(&mut self, now_ms: u64) -> bool {
        match self.last_adaptation_ms {
            Some(last) if now_ms.saturating_sub(last) < self.config.adaptation_interval_ms => {
                return false;
            }
            _ => {}
        }
        self.last_adaptation_ms = Some(now_ms);

        let before = self.target_buffer_ms;
        if self.average_jitter_ms > self.config.jitter_threshold_ms {
            self.target_buffer_ms =
                (self.target_buffer_ms + ADAPT_GROW_MS).min(self.config.max_buffer_ms);
        } else if self.average_jitter_ms < self.config.jitter_threshold_ms / 2.0 {
            self.target_buffer_ms = self
                .target_buffer_ms
                .saturating_sub(ADAPT_SHRINK_MS)
                .max(self.config.min_buffer_ms);
        }

        if self.target_buffer_ms != before {
            let packets =
                (self.target_buffer_ms as f64 / self.config.packet_interval_ms()).round() as usize;
            self.min_packets = packets.clamp(1, self.config.max_packets - 1);
            debug!(
                target_ms = self.target_buffer_ms,
                min_packets = self.min_packets,
                average_jitter_ms = self.average_jitter_ms,
                "adapted jitter buffer target"
            );
            true
        } else {
            false
        }
    }

    /// Discard all buffered packets and reset sequencing state.
    ///
    /// Statistics and the learned jitter average survive a clear.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_inserted = None;
        self.next_expected = None;
        self.ready = false;
        self.empty_since_ms = None;
    }

    /// Packets currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer holds no packets.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether the buffer is primed for playback.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Override the ready threshold in packets.
    pub fn set_min_packets(&mut self, min_packets: usize) {
        self.min_packets = min_packets.max(1);
    }

    /// Override the hard packet bound, evicting down to it if needed.
    pub fn set_max_packets(&mut self, max_packets: usize) {
        self.config.max_packets = max_packets.max(2);
        while self.buffer.len() > self.config.max_packets {
            if self.buffer.pop_first().is_some() {
                self.packets_dropped += 1;
            }
        }
    }

    /// Snapshot of counters and gauges.
    pub fn stats(&self) -> JitterStats {
        JitterStats {
            packets_received: self.packets_received,
            packets_lost: self.packets_lost,
            packets_dropped: self.packets_dropped,
            packets_played: self.packets_played,
            duplicates: self.duplicates,
            silence_inserted: self.silence_inserted,
            buffered_packets: self.buffer.len(),
            average_jitter_ms: self.average_jitter_ms,
            target_buffer_ms: self.target_buffer_ms,
            is_ready: self.ready,
            expected_sequence: self.next_expected.unwrap_or(0),
            highest_sequence: self.highest_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JitterConfig {
        JitterConfig {
            min_packets: 3,
            ..JitterConfig::default()
        }
    }

    fn packet(sequence: u32, arrival_ms: u64) -> ReceivedPacket {
        // 256 frames at 44.1 kHz is ~5.8 ms per packet; keep sender
        // timestamps on that cadence so jitter reads as zero.
        ReceivedPacket {
            sequence,
            timestamp: sequence as u64 * 5805,
            arrival_ms,
            sample_rate: 44_100,
            channels: 1,
            samples: vec![sequence as f32; 256],
            valid: true,
            concealed: false,
        }
    }

    #[test]
    fn out_of_order_arrival_is_reordered() {
        let mut jb = JitterBuffer::new(test_config()).unwrap();
        for (i, seq) in [1u32, 3, 2, 4, 5].iter().enumerate() {
            jb.insert(packet(*seq, i as u64 * 6));
        }
        assert!(jb.is_ready());

        let pulled: Vec<ReceivedPacket> = std::iter::from_fn(|| jb.pop(100)).collect();
        let sequences: Vec<u32> = pulled.iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        // The reordered packet 2 is the real one, not a placeholder.
        assert!(pulled.iter().all(|p| !p.concealed));
        assert_eq!(jb.stats().packets_lost, 0);
    }

    #[test]
    fn not_ready_before_min_packets() {
        let mut jb = JitterBuffer::new(test_config()).unwrap();
        jb.insert(packet(1, 0));
        jb.insert(packet(2, 6));
        assert!(!jb.is_ready());
        assert_eq!(jb.pop(50), None);
    }

    #[test]
    fn gap_with_timeout_is_concealed_once() {
        // Arrivals [1, 2, 4, 5, 6] with a long pause before 4. The pulled
        // stream is 1, 2, silence(3), 4, 5, 6 with exactly one loss.
        let mut jb = JitterBuffer::new(test_config()).unwrap();
        jb.insert(packet(1, 0));
        jb.insert(packet(2, 6));
        jb.insert(packet(4, 200));
        jb.insert(packet(5, 206));
        jb.insert(packet(6, 212));

        let pulled: Vec<(u32, bool)> = std::iter::from_fn(|| jb.pop(300))
            .map(|p| (p.sequence, p.concealed))
            .collect();
        assert_eq!(
            pulled,
            vec![
                (1, false),
                (2, false),
                (3, true),
                (4, false),
                (5, false),
                (6, false)
            ]
        );

        let stats = jb.stats();
        assert_eq!(stats.silence_inserted, 1);
        assert_eq!(stats.packets_lost, 1);
    }

    #[test]
    fn silence_placeholders_fill_exactly_the_missing_sequences() {
        let mut jb = JitterBuffer::new(test_config()).unwrap();
        // 3 and 4 never arrive.
        for (i, seq) in [1u32, 2, 5, 6, 7].iter().enumerate() {
            jb.insert(packet(*seq, i as u64 * 6));
        }

        let pulled: Vec<ReceivedPacket> = std::iter::from_fn(|| jb.pop(200)).collect();
        let sequences: Vec<u32> = pulled.iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6, 7]);

        let concealed: Vec<u32> = pulled
            .iter()
            .filter(|p| p.concealed)
            .map(|p| p.sequence)
            .collect();
        assert_eq!(concealed, vec![3, 4]);
        assert!(pulled
            .iter()
            .filter(|p| p.concealed)
            .all(|p| p.samples.iter().all(|&s| s == 0.0)));
    }

    #[test]
    fn pull_side_concealment_after_large_gap() {
        let mut jb = JitterBuffer::new(test_config()).unwrap();
        jb.insert(packet(1, 0));
        jb.insert(packet(2, 6));
        jb.insert(packet(3, 12));
        // Gap of 6 exceeds max_gap_synthesis, so nothing is synthesized
        // at insert time.
        jb.insert(packet(10, 500));

        assert_eq!(jb.pop(510).unwrap().sequence, 1);
        assert_eq!(jb.pop(510).unwrap().sequence, 2);
        assert_eq!(jb.pop(510).unwrap().sequence, 3);

        // Sequence 4 is missing; before the timeout nothing comes out.
        assert!(jb.pop(510).is_none());

        // After the timeout each missing sequence is concealed in turn.
        for expected in 4u32..10 {
            let p = jb.pop(700).unwrap();
            assert_eq!(p.sequence, expected);
            assert!(p.concealed);
        }
        assert_eq!(jb.pop(700).unwrap().sequence, 10);
        assert_eq!(jb.stats().packets_lost, 6);
    }

    #[test]
    fn duplicate_sequence_is_delivered_once() {
        let mut jb = JitterBuffer::new(test_config()).unwrap();
        jb.insert(packet(1, 0));
        jb.insert(packet(2, 6));
        jb.insert(packet(2, 7));
        jb.insert(packet(3, 12));

        let pulled: Vec<u32> = std::iter::from_fn(|| jb.pop(50)).map(|p| p.sequence).collect();
        assert_eq!(pulled, vec![1, 2, 3]);

        let stats = jb.stats();
        assert_eq!(stats.packets_received, 4);
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn strictly_increasing_delivery() {
        let mut jb = JitterBuffer::new(test_config()).unwrap();
        for (i, seq) in [5u32, 1, 4, 2, 3, 8, 6, 7].iter().enumerate() {
            jb.insert(packet(*seq, i as u64 * 6));
        }
        let pulled: Vec<u32> = std::iter::from_fn(|| jb.pop(100)).map(|p| p.sequence).collect();
        for pair in pulled.windows(2) {
            assert!(pair[1] > pair[0], "delivery went backwards: {:?}", pulled);
        }
        assert_eq!(pulled, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn full_buffer_evicts_lowest_sequence() {
        let config = JitterConfig {
            min_packets: 2,
            max_packets: 4,
            ..JitterConfig::default()
        };
        let mut jb = JitterBuffer::new(config).unwrap();
        for seq in 1u32..=6 {
            jb.insert(packet(seq, seq as u64 * 6));
        }
        assert_eq!(jb.len(), 4);
        // 1 and 2 were evicted to admit 5 and 6.
        assert_eq!(jb.pop(100).unwrap().sequence, 3);
        assert_eq!(jb.stats().packets_dropped, 2);
    }

    #[test]
    fn rebuffers_after_silence_tolerance() {
        let mut jb = JitterBuffer::new(test_config()).unwrap();
        for seq in 1u32..=3 {
            jb.insert(packet(seq, seq as u64 * 6));
        }
        assert!(jb.is_ready());
        for _ in 0..3 {
            assert!(jb.pop(30).is_some());
        }
        assert!(jb.is_empty());

        // Still ready inside the tolerance window.
        assert!(jb.pop(40).is_none());
        assert!(jb.is_ready());

        // Past the 50 ms tolerance the buffer goes back to priming.
        assert!(jb.pop(120).is_none());
        assert!(!jb.is_ready());

        // Re-prime with a fresh run of sequences; delivery resynchronizes
        // instead of concealing its way up from the old position.
        for seq in 10u32..=12 {
            jb.insert(packet(seq, 200 + seq as u64 * 6));
        }
        assert!(jb.is_ready());
        assert_eq!(jb.pop(300).unwrap().sequence, 10);
    }

    #[test]
    fn adaptation_grows_and_shrinks_target() {
        let mut jb = JitterBuffer::new(test_config()).unwrap();

        // Irregular arrivals on a regular send cadence: high jitter.
        let arrivals = [0u64, 40, 45, 95, 100, 160, 162, 230];
        for (i, &arrival) in arrivals.iter().enumerate() {
            jb.insert(packet(i as u32 + 1, arrival));
        }
        assert!(jb.stats().average_jitter_ms > 10.0);

        assert!(jb.maybe_adapt(1000));
        assert_eq!(jb.stats().target_buffer_ms, 60);

        // Within the adaptation interval nothing changes.
        assert!(!jb.maybe_adapt(1500));

        // Smooth arrivals pull the average back down and shrink the target.
        let mut jb = JitterBuffer::new(test_config()).unwrap();
        for seq in 1u32..=20 {
            jb.insert(packet(seq, seq as u64 * 6));
        }
        assert!(jb.stats().average_jitter_ms < 5.0);
        assert!(jb.maybe_adapt(1000));
        assert_eq!(jb.stats().target_buffer_ms, 45);
        assert!(jb.maybe_adapt(2000));
        assert_eq!(jb.stats().target_buffer_ms, 40);
    }

    #[test]
    fn clear_resets_sequencing_but_keeps_counters() {
        let mut jb = JitterBuffer::new(test_config()).unwrap();
        for seq in 1u32..=4 {
            jb.insert(packet(seq, seq as u64 * 6));
        }
        jb.pop(30);
        let played_before = jb.stats().packets_played;

        jb.clear();
        assert!(jb.is_empty());
        assert!(!jb.is_ready());
        assert_eq!(jb.stats().packets_played, played_before);
        assert_eq!(jb.stats().packets_received, 4);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let config = JitterConfig {
            min_buffer_ms: 100,
            max_buffer_ms: 50,
            ..JitterConfig::default()
        };
        assert!(JitterBuffer::new(config).is_err());

        let config = JitterConfig {
            sample_rate: 0,
            ..JitterConfig::default()
        };
        assert!(JitterBuffer::new(config).is_err());
    }
}
