//! Strict length-prefixed framing over async byte streams.
//!
//! Reads are exact: the 24-byte header is read in full, validated, and
//! then exactly `length - 24` payload bytes are read. A short read means
//! the connection is gone. Writes always flush the complete frame.
//!
//! [`read_message`] hands back a decoded [`Message`]; [`read_frame`] hands
//! back the validated header plus the untouched wire bytes, which is what
//! the relay forwards so broadcast stays byte-for-byte identical to the
//! sender's frame.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Result, WireError};
use crate::message::{Message, MessageHeader};
use crate::HEADER_LEN;

/// A validated header together with the raw frame bytes it arrived in.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The decoded, validated header.
    pub header: MessageHeader,
    /// The complete wire frame: header bytes followed by payload bytes.
    pub bytes: Bytes,
}

impl Frame {
    /// Fully decode the frame into a [`Message`].
    pub fn into_message(self) -> Result<Message> {
        Message::decode(&self.bytes)
    }
}

/// Read one complete frame, returning the validated header and raw bytes.
///
/// Errors tear down framing: `ConnectionClosed` when the peer shut the
/// stream between frames, `Io` on transport failure, and the header
/// validation errors from [`MessageHeader::decode`] on corrupt prefixes.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.resize(HEADER_LEN, 0);
    if let Err(e) = reader.read_exact(&mut buf).await {
        return Err(map_eof(e));
    }

    let header = MessageHeader::decode(&buf)?;
    let payload_len = header.payload_len();
    trace!(kind = ?header.kind, sequence = header.sequence, payload_len, "frame header");

    if payload_len > 0 {
        let start = buf.len();
        buf.resize(start + payload_len, 0);
        if let Err(e) = reader.read_exact(&mut buf[start..]).await {
            return Err(map_eof(e));
        }
    }

    Ok(Frame {
        header,
        bytes: buf.freeze(),
    })
}

/// Read and fully decode one message.
pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    read_frame(reader).await?.into_message()
}

/// Write a complete message, flushing it onto the stream.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &message.encode()).await
}

/// Write pre-encoded frame bytes, flushing them onto the stream.
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

fn map_eof(e: std::io::Error) -> WireError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        WireError::ConnectionClosed
    } else {
        WireError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageKind};

    #[tokio::test]
    async fn frame_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let msg = Message::audio(3, 777, &[0.25f32; 64]);
        write_message(&mut a, &msg).await.unwrap();

        let received = read_message(&mut b).await.unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn raw_frame_preserves_bytes() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let msg = Message::audio(9, 1, &[0.5f32; 16]);
        let encoded = msg.encode();
        write_frame(&mut a, &encoded).await.unwrap();

        let frame = read_frame(&mut b).await.unwrap();
        assert_eq!(frame.bytes, encoded);
        assert_eq!(frame.header.kind, MessageKind::AudioData);
        assert_eq!(frame.header.sequence, 9);
    }

    #[tokio::test]
    async fn sequential_frames_stay_framed() {
        let (mut a, mut b) = tokio::io::duplex(65536);

        for seq in 0..10u32 {
            let msg = Message::audio(seq, seq as u64, &[seq as f32; 32]);
            write_message(&mut a, &msg).await.unwrap();
        }

        for seq in 0..10u32 {
            let msg = read_message(&mut b).await.unwrap();
            assert_eq!(msg.sequence, seq);
            assert_eq!(msg.audio_samples().unwrap(), vec![seq as f32; 32]);
        }
    }

    #[tokio::test]
    async fn closed_stream_reports_connection_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);

        match read_message(&mut b).await {
            Err(WireError::ConnectionClosed) => {}
            other => panic!("expected ConnectionClosed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn corrupt_magic_is_fatal() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let mut bytes = Message::heartbeat(0).encode().to_vec();
        bytes[0] = 0xde;
        write_frame(&mut a, &bytes).await.unwrap();

        let err = read_message(&mut b).await.unwrap_err();
        assert!(err.is_framing_fatal());
    }
}
