//! Network pipeline: relay link, transmit path, receive path.
//!
//! The endpoint holds one TCP connection to the relay. After the
//! CONNECT / CONFIG / CLIENT_READY handshake the stream is split: the
//! write half belongs to the transmit task ([`sender`]), the read half to
//! the receive task ([`receiver`]). The controller supervises both and
//! owns reconnection.

pub mod receiver;
pub mod sender;

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info};

use audsync_wire_core::{clock, framing, Message, StreamConfig};

use crate::config::NetSettings;
use crate::error::{EndpointError, Result};

/// Connect to the relay and run the registration handshake.
///
/// On success the connection is registered, configured, and marked ready
/// for broadcast; the caller receives the split halves.
pub async fn connect_and_handshake(
    settings: &NetSettings,
    stream_config: StreamConfig,
) -> Result<(tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf)> {
    let addr = settings.addr();
    debug!(%addr, "connecting to relay");

    let connect = TcpStream::connect(&addr);
    let stream = tokio::time::timeout(Duration::from_millis(settings.connect_timeout_ms), connect)
        .await
        .map_err(|_| EndpointError::ConnectFailed {
            addr: addr.clone(),
            reason: "connect timed out".to_string(),
        })?
        .map_err(|e| EndpointError::ConnectFailed {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
    stream.set_nodelay(true)?;

    let (read_half, mut write_half) = stream.into_split();

    framing::write_message(&mut write_half, &Message::connect(clock::now_micros())).await?;
    framing::write_message(
        &mut write_half,
        &Message::config(clock::now_micros(), &stream_config),
    )
    .await?;
    framing::write_message(&mut write_half, &Message::client_ready(clock::now_micros())).await?;

    info!(%addr, "registered with relay");
    Ok((read_half, write_half))
}
