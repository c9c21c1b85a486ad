//! The relay server: accept loop, per-client tasks, dispatch.
//!
//! Every accepted connection gets a session record, a reader task and a
//! writer task. The reader parses frames and dispatches on kind; the
//! writer drains the client's bounded outbound queue onto the socket.
//! Any framing or socket failure ends both tasks and frees the session —
//! cleanup is identical for errors and orderly disconnects.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use audsync_wire_core::{framing, MessageKind, WireError};

use crate::error::{RelayError, Result};
use crate::session::{ClientPhase, ClientRecord, ClientSummary, Outbound, SessionTable};
use crate::session_log::SessionLog;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind, e.g. `0.0.0.0`.
    pub bind_addr: String,
    /// TCP port to listen on.
    pub port: u16,
    /// Per-client outbound queue depth, in frames.
    pub outbound_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: audsync_wire_core::DEFAULT_PORT,
            outbound_queue: 64,
        }
    }
}

/// Relay-wide counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Messages received across all clients.
    pub messages_received: AtomicU64,
    /// AUDIO_DATA deliveries queued (frames × recipients).
    pub frames_forwarded: AtomicU64,
    /// Heartbeats echoed back.
    pub heartbeats_echoed: AtomicU64,
    /// Total clients ever accepted.
    pub clients_accepted: AtomicU64,
    /// Clients torn down due to protocol or socket errors.
    pub clients_errored: AtomicU64,
}

/// Snapshot of [`RelayStats`] for display.
#[derive(Debug, Clone)]
pub struct RelayStatsSnapshot {
    /// Messages received across all clients.
    pub messages_received: u64,
    /// AUDIO_DATA deliveries queued.
    pub frames_forwarded: u64,
    /// Heartbeats echoed back.
    pub heartbeats_echoed: u64,
    /// Total clients ever accepted.
    pub clients_accepted: u64,
    /// Clients torn down on error.
    pub clients_errored: u64,
}

/// The running relay.
pub struct RelayServer {
    sessions: Arc<SessionTable>,
    stats: Arc<RelayStats>,
    log: Arc<SessionLog>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl RelayServer {
    /// Bind the listen socket and start accepting clients.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.bind_addr, config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| RelayError::Bind {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
        let local_addr = listener.local_addr()?;

        let sessions = Arc::new(SessionTable::new());
        let stats = Arc::new(RelayStats::default());
        let log = Arc::new(SessionLog::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&sessions),
            Arc::clone(&stats),
            Arc::clone(&log),
            config.outbound_queue,
            shutdown_rx,
        ));

        info!(%local_addr, "relay listening");
        Ok(Self {
            sessions,
            stats,
            log,
            local_addr,
            shutdown: shutdown_tx,
            accept_task: Some(accept_task),
        })
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected clients.
    pub fn connected_clients(&self) -> usize {
        self.sessions.len()
    }

    /// Per-client status snapshot.
    pub fn snapshot(&self) -> Vec<ClientSummary> {
        self.sessions.snapshot()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            frames_forwarded: self.stats.frames_forwarded.load(Ordering::Relaxed),
            heartbeats_echoed: self.stats.heartbeats_echoed.load(Ordering::Relaxed),
            clients_accepted: self.stats.clients_accepted.load(Ordering::Relaxed),
            clients_errored: self.stats.clients_errored.load(Ordering::Relaxed),
        }
    }

    /// The relay's session log, toggled from the CLI.
    pub fn session_log(&self) -> Arc<SessionLog> {
        Arc::clone(&self.log)
    }

    /// Stop accepting and wait for the accept loop to exit.
    ///
    /// Client tasks notice their sockets closing and clean up on their
    /// own.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!("accept loop panicked: {e}");
            }
        }
        info!("relay stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    sessions: Arc<SessionTable>,
    stats: Arc<RelayStats>,
    log: Arc<SessionLog>,
    outbound_queue: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        stats.clients_accepted.fetch_add(1, Ordering::Relaxed);
                        spawn_client(stream, addr, &sessions, &stats, &log, outbound_queue);
                    }
                    Err(e) => {
                        warn!("accept failed: {e}");
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("accept loop shutting down");
                return;
            }
        }
    }
}

fn spawn_client(
    stream: TcpStream,
    addr: SocketAddr,
    sessions: &Arc<SessionTable>,
    stats: &Arc<RelayStats>,
    log: &Arc<SessionLog>,
    outbound_queue: usize,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%addr, "set_nodelay failed: {e}");
    }
    let (read_half, write_half) = stream.into_split();

    let id = Uuid::new_v4();
    let outbound = Arc::new(Outbound::new(outbound_queue));
    sessions.insert(ClientRecord {
        id,
        addr,
        phase: ClientPhase::Accepted,
        config: None,
        outbound: Arc::clone(&outbound),
    });
    info!(%id, %addr, clients = sessions.len(), "client accepted");
    log.line(&format!("client {id} accepted from {addr}"));

    tokio::spawn(client_writer(id, write_half, Arc::clone(&outbound)));
    tokio::spawn(client_reader(
        id,
        addr,
        read_half,
        Arc::clone(sessions),
        Arc::clone(stats),
        Arc::clone(log),
    ));
}

async fn client_writer(id: Uuid, mut write_half: OwnedWriteHalf, outbound: Arc<Outbound>) {
    while let Some(bytes) = outbound.pop().await {
        if let Err(e) = framing::write_frame(&mut write_half, &bytes).await {
            debug!(%id, "writer stopping: {e}");
            break;
        }
    }
    debug!(%id, "writer task done");
}

async fn client_reader(
    id: Uuid,
    addr: SocketAddr,
    mut read_half: OwnedReadHalf,
    sessions: Arc<SessionTable>,
    stats: Arc<RelayStats>,
    log: Arc<SessionLog>,
) {
    let exit: std::result::Result<&str, WireError> = loop {
        let frame = match framing::read_frame(&mut read_half).await {
            Ok(frame) => frame,
            Err(WireError::ConnectionClosed) => break Ok("connection closed"),
            Err(e) => break Err(e),
        };
        stats.messages_received.fetch_add(1, Ordering::Relaxed);

        match frame.header.kind {
            MessageKind::Connect => {
                sessions.set_phase(id, ClientPhase::Registered);
                debug!(%id, "client registered");
            }
            MessageKind::Config => match frame.into_message().and_then(|m| m.stream_config()) {
                Ok(config) => {
                    debug!(
                        %id,
                        sample_rate = config.sample_rate,
                        channels = config.channels,
                        frames_per_buffer = config.frames_per_buffer,
                        "client configured"
                    );
                    log.line(&format!(
                        "client {id} configured: {} Hz, {} ch, {} frames",
                        config.sample_rate, config.channels, config.frames_per_buffer
                    ));
                    sessions.set_config(id, config);
                }
                Err(e) => break Err(e),
            },
            MessageKind::ClientReady => {
                sessions.set_phase(id, ClientPhase::Ready);
                info!(%id, "client ready for audio");
                log.line(&format!("client {id} ready"));
            }
            MessageKind::AudioData => {
                let delivered = sessions.broadcast_from(id, &frame.bytes);
                stats
                    .frames_forwarded
                    .fetch_add(delivered as u64, Ordering::Relaxed);
            }
            MessageKind::Heartbeat => {
                // Echoed to the sender only, byte-for-byte.
                sessions.echo_to(id, frame.bytes);
                stats.heartbeats_echoed.fetch_add(1, Ordering::Relaxed);
            }
            MessageKind::Disconnect => break Ok("disconnect requested"),
        }
    };

    match exit {
        Ok(reason) => {
            info!(%id, %addr, reason, "client session ended");
            log.line(&format!("client {id} left: {reason}"));
        }
        Err(e) => {
            stats.clients_errored.fetch_add(1, Ordering::Relaxed);
            warn!(%id, %addr, "client session errored: {e}");
            log.line(&format!("client {id} errored: {e}"));
        }
    }
    sessions.remove(id);
}
