//! Message types and serialization.
//!
//! Every AudSync message is a fixed 24-byte little-endian header followed
//! by an opaque payload. The header layout is:
//!
//! | field     | width | meaning                                     |
//! |-----------|-------|---------------------------------------------|
//! | magic     | u32   | `0x41554453` ("AUDS")                       |
//! | kind      | u16   | [`MessageKind`]                             |
//! | length    | u32   | total bytes including the header            |
//! | sequence  | u32   | monotonic per-sender counter                |
//! | timestamp | u64   | sender microseconds since an arbitrary epoch|
//!
//! Two bytes of padding after `kind` keep the layout at a fixed 24 bytes;
//! they are written as zero and ignored on decode.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::{HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN};

/// The kind of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    /// Raw interleaved f32 audio samples.
    AudioData = 1,
    /// Keep-alive; the relay echoes it back to the sender.
    Heartbeat = 2,
    /// Declares the sender's stream format (see [`StreamConfig`]).
    Config = 3,
    /// Orderly teardown of this client's session.
    Disconnect = 4,
    /// Registers the sender with the relay.
    Connect = 5,
    /// Marks the sender eligible to receive broadcast audio.
    ClientReady = 6,
}

impl MessageKind {
    /// Decode a raw kind value from the wire.
    pub fn from_wire(kind: u16) -> Result<Self> {
        match kind {
            1 => Ok(MessageKind::AudioData),
            2 => Ok(MessageKind::Heartbeat),
            3 => Ok(MessageKind::Config),
            4 => Ok(MessageKind::Disconnect),
            5 => Ok(MessageKind::Connect),
            6 => Ok(MessageKind::ClientReady),
            other => Err(WireError::UnknownKind { kind: other }),
        }
    }
}

/// The fixed message header.
///
/// The magic constant is implicit: it is written on encode and validated
/// on decode, but not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message kind.
    pub kind: MessageKind,
    /// Total message length in bytes, including this header.
    pub length: u32,
    /// Monotonic per-sender sequence number.
    pub sequence: u32,
    /// Sender-side timestamp in microseconds since an arbitrary epoch.
    pub timestamp: u64,
}

impl MessageHeader {
    /// Number of payload bytes that follow this header.
    pub fn payload_len(&self) -> usize {
        self.length as usize - HEADER_LEN
    }

    /// Encode the header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(MAGIC);
        buf.put_u16_le(self.kind as u16);
        buf.put_u16_le(0); // padding
        buf.put_u32_le(self.length);
        buf.put_u32_le(self.sequence);
        buf.put_u64_le(self.timestamp);
    }

    /// Decode and validate a header from exactly [`HEADER_LEN`] bytes.
    ///
    /// Enforces the framing invariants: the magic must match, the length
    /// must cover at least the header, and the payload must stay within
    /// [`MAX_PAYLOAD_LEN`].
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        debug_assert!(buf.len() >= HEADER_LEN);

        let magic = buf.get_u32_le();
        if magic != MAGIC {
            return Err(WireError::InvalidMagic { found: magic });
        }

        let kind = MessageKind::from_wire(buf.get_u16_le())?;
        let _padding = buf.get_u16_le();

        let length = buf.get_u32_le();
        if (length as usize) < HEADER_LEN {
            return Err(WireError::InvalidLength {
                length,
                header_len: HEADER_LEN,
            });
        }
        if length as usize - HEADER_LEN > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLarge {
                length: length - HEADER_LEN as u32,
                limit: MAX_PAYLOAD_LEN,
            });
        }

        let sequence = buf.get_u32_le();
        let timestamp = buf.get_u64_le();

        Ok(MessageHeader {
            kind,
            length,
            sequence,
            timestamp,
        })
    }
}

/// A complete wire message: header fields plus an opaque payload.
///
/// Created on capture or on decode, consumed by transmit or by jitter
/// insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Message kind.
    pub kind: MessageKind,
    /// Per-sender sequence number.
    pub sequence: u32,
    /// Sender timestamp in microseconds.
    pub timestamp: u64,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl Message {
    /// Build an AUDIO_DATA message from interleaved f32 samples.
    pub fn audio(sequence: u32, timestamp: u64, samples: &[f32]) -> Self {
        let mut payload = BytesMut::with_capacity(samples.len() * 4);
        for &sample in samples {
            payload.put_f32_le(sample);
        }
        Message {
            kind: MessageKind::AudioData,
            sequence,
            timestamp,
            payload: payload.freeze(),
        }
    }

    /// Build a HEARTBEAT message.
    pub fn heartbeat(timestamp: u64) -> Self {
        Message::empty(MessageKind::Heartbeat, timestamp)
    }

    /// Build a CONFIG message carrying the sender's stream format.
    pub fn config(timestamp: u64, config: &StreamConfig) -> Self {
        Message {
            kind: MessageKind::Config,
            sequence: 0,
            timestamp,
            payload: config.encode(),
        }
    }

    /// Build a CONNECT message.
    pub fn connect(timestamp: u64) -> Self {
        Message::empty(MessageKind::Connect, timestamp)
    }

    /// Build a DISCONNECT message.
    pub fn disconnect(timestamp: u64) -> Self {
        Message::empty(MessageKind::Disconnect, timestamp)
    }

    /// Build a CLIENT_READY message.
    pub fn client_ready(timestamp: u64) -> Self {
        Message::empty(MessageKind::ClientReady, timestamp)
    }

    fn empty(kind: MessageKind, timestamp: u64) -> Self {
        Message {
            kind,
            sequence: 0,
            timestamp,
            payload: Bytes::new(),
        }
    }

    /// Total encoded length including the header.
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// The header this message encodes with.
    pub fn header(&self) -> MessageHeader {
        MessageHeader {
            kind: self.kind,
            length: self.total_len() as u32,
            sequence: self.sequence,
            timestamp: self.timestamp,
        }
    }

    /// Serialize the full message into a contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_len());
        self.header().encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Deserialize a message from a contiguous buffer.
    ///
    /// The buffer must contain exactly one message; trailing bytes are an
    /// `InvalidLength` error, since framed reads always hand over exact
    /// frames.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::InvalidLength {
                length: buf.len() as u32,
                header_len: HEADER_LEN,
            });
        }
        let header = MessageHeader::decode(&buf[..HEADER_LEN])?;
        if header.length as usize != buf.len() {
            return Err(WireError::InvalidLength {
                length: header.length,
                header_len: HEADER_LEN,
            });
        }
        Ok(Message {
            kind: header.kind,
            sequence: header.sequence,
            timestamp: header.timestamp,
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN..]),
        })
    }

    /// Decode an AUDIO_DATA payload into f32 samples.
    pub fn audio_samples(&self) -> Result<Vec<f32>> {
        if self.kind != MessageKind::AudioData {
            return Err(WireError::WrongKind { kind: self.kind });
        }
        if self.payload.len() % 4 != 0 {
            return Err(WireError::MisalignedAudio {
                length: self.payload.len(),
            });
        }
        let mut samples = Vec::with_capacity(self.payload.len() / 4);
        let mut buf = &self.payload[..];
        while buf.remaining() >= 4 {
            samples.push(buf.get_f32_le());
        }
        Ok(samples)
    }

    /// Decode a CONFIG payload.
    pub fn stream_config(&self) -> Result<StreamConfig> {
        if self.kind != MessageKind::Config {
            return Err(WireError::WrongKind { kind: self.kind });
        }
        StreamConfig::decode(&self.payload)
    }
}

/// A client's declared audio stream format, carried in CONFIG payloads.
///
/// Encoded as three signed little-endian 32-bit integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Samples per second per channel.
    pub sample_rate: i32,
    /// Interleaved channel count (1 = mono, 2 = stereo).
    pub channels: i32,
    /// Frames per buffer: the pipeline's scheduling unit.
    pub frames_per_buffer: i32,
}

impl StreamConfig {
    /// Encoded payload size in bytes.
    pub const ENCODED_LEN: usize = 12;

    /// Encode into a CONFIG payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        buf.put_i32_le(self.sample_rate);
        buf.put_i32_le(self.channels);
        buf.put_i32_le(self.frames_per_buffer);
        buf.freeze()
    }

    /// Decode from a CONFIG payload.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::ENCODED_LEN {
            return Err(WireError::BadConfigPayload {
                expected: Self::ENCODED_LEN,
                length: buf.len(),
            });
        }
        Ok(StreamConfig {
            sample_rate: buf.get_i32_le(),
            channels: buf.get_i32_le(),
            frames_per_buffer: buf.get_i32_le(),
        })
    }

    /// Samples in one frame (`frames_per_buffer × channels`).
    pub fn samples_per_frame(&self) -> usize {
        self.frames_per_buffer as usize * self.channels as usize
    }
}

/// Monotonic timestamps shared by every sender-side component.
pub mod clock {
    use std::sync::OnceLock;
    use std::time::Instant;

    fn epoch() -> Instant {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        *EPOCH.get_or_init(Instant::now)
    }

    /// Microseconds since the process-local epoch.
    pub fn now_micros() -> u64 {
        epoch().elapsed().as_micros() as u64
    }

    /// Milliseconds since the process-local epoch.
    pub fn now_millis() -> u64 {
        epoch().elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = MessageHeader {
            kind: MessageKind::AudioData,
            length: (HEADER_LEN + 1024) as u32,
            sequence: 42,
            timestamp: 1_234_567,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[..4], MAGIC.to_le_bytes().as_slice());

        let decoded = MessageHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn message_round_trip() {
        let samples = [0.0f32, 0.5, -0.5, 1.0, -1.0];
        let msg = Message::audio(7, 99_000, &samples);
        let encoded = msg.encode();
        assert_eq!(&encoded[..4], MAGIC.to_le_bytes().as_slice());

        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.audio_samples().unwrap(), samples);
    }

    #[test]
    fn empty_payload_round_trip() {
        for msg in [
            Message::heartbeat(5),
            Message::connect(6),
            Message::disconnect(7),
            Message::client_ready(8),
        ] {
            let decoded = Message::decode(&msg.encode()).unwrap();
            assert_eq!(decoded, msg);
            assert!(decoded.payload.is_empty());
        }
    }

    #[test]
    fn config_round_trip() {
        let config = StreamConfig {
            sample_rate: 44_100,
            channels: 1,
            frames_per_buffer: 256,
        };
        let msg = Message::config(0, &config);
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.stream_config().unwrap(), config);
        assert_eq!(config.samples_per_frame(), 256);
    }

    #[test]
    fn rejects_bad_magic() {
        let msg = Message::heartbeat(0);
        let mut bytes = msg.encode().to_vec();
        bytes[0] ^= 0xff;
        match Message::decode(&bytes) {
            Err(WireError::InvalidMagic { .. }) => {}
            other => panic!("expected InvalidMagic, got {:?}", other),
        }
    }

    #[test]
    fn rejects_short_length() {
        let msg = Message::heartbeat(0);
        let mut bytes = msg.encode().to_vec();
        // Corrupt the length field to be smaller than the header.
        bytes[8..12].copy_from_slice(&4u32.to_le_bytes());
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn rejects_unknown_kind() {
        let msg = Message::heartbeat(0);
        let mut bytes = msg.encode().to_vec();
        bytes[4..6].copy_from_slice(&999u16.to_le_bytes());
        match Message::decode(&bytes) {
            Err(WireError::UnknownKind { kind: 999 }) => {}
            other => panic!("expected UnknownKind, got {:?}", other),
        }
    }

    #[test]
    fn rejects_misaligned_audio_payload() {
        let msg = Message {
            kind: MessageKind::AudioData,
            sequence: 1,
            timestamp: 0,
            payload: Bytes::from_static(&[1, 2, 3]),
        };
        assert!(matches!(
            msg.audio_samples(),
            Err(WireError::MisalignedAudio { length: 3 })
        ));
    }

    #[test]
    fn monotonic_clock() {
        let a = clock::now_micros();
        let b = clock::now_micros();
        assert!(b >= a);
    }
}
