//! Per-client session records and the session table.
//!
//! One mutex guards the client vector. Broadcast iterates under the lock
//! but only performs non-blocking queue pushes; the actual socket writes
//! happen on each client's writer task, so one slow client can never
//! stall the others.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, trace};
use uuid::Uuid;

use audsync_wire_core::StreamConfig;

/// A client's progress through the relay session handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    /// TCP accepted, nothing received yet.
    Accepted,
    /// CONNECT received.
    Registered,
    /// CONFIG received; the declared format is recorded.
    Configured,
    /// CLIENT_READY received; eligible for broadcast.
    Ready,
}

impl fmt::Display for ClientPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientPhase::Accepted => "accepted",
            ClientPhase::Registered => "registered",
            ClientPhase::Configured => "configured",
            ClientPhase::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Bounded outbound frame queue, drained by the client's writer task.
///
/// Overflow drops the oldest queued frame: for live audio the newest data
/// is always the most valuable.
pub struct Outbound {
    queue: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl Outbound {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a frame, evicting the oldest on overflow. Never blocks.
    pub fn push(&self, bytes: Bytes) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(bytes);
        }
        self.notify.notify_one();
    }

    /// Wait for the next frame; `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            if let Some(bytes) = {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                queue.pop_front()
            } {
                return Some(bytes);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue; pending frames are discarded.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // notify_one stores a permit even with no waiter parked yet, so
        // the single consumer cannot miss the close.
        self.notify.notify_one();
    }

    /// Frames evicted by the overflow policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// One connected client.
pub struct ClientRecord {
    /// Stable session id.
    pub id: Uuid,
    /// Remote socket address.
    pub addr: SocketAddr,
    /// Handshake phase.
    pub phase: ClientPhase,
    /// The client's declared audio format, once CONFIG arrives.
    pub config: Option<StreamConfig>,
    /// Outbound frame queue shared with the writer task.
    pub outbound: Arc<Outbound>,
}

impl ClientRecord {
    fn is_ready(&self) -> bool {
        self.phase == ClientPhase::Ready
    }
}

/// Status snapshot of one client, for the relay CLI.
#[derive(Debug, Clone)]
pub struct ClientSummary {
    /// Stable session id.
    pub id: Uuid,
    /// Remote socket address.
    pub addr: SocketAddr,
    /// Handshake phase.
    pub phase: ClientPhase,
    /// Declared format, if configured.
    pub config: Option<StreamConfig>,
    /// Outbound frames evicted for this client.
    pub dropped_outbound: u64,
}

/// The set of connected clients.
pub struct SessionTable {
    clients: Mutex<Vec<ClientRecord>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Register a freshly accepted connection.
    pub fn insert(&self, record: ClientRecord) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        debug!(id = %record.id, addr = %record.addr, "client session created");
        clients.push(record);
    }

    /// Remove a client, closing its outbound queue.
    pub fn remove(&self, id: Uuid) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = clients.iter().position(|c| c.id == id) {
            let record = clients.swap_remove(pos);
            record.outbound.close();
            debug!(id = %id, "client session removed");
        }
    }

    /// Advance a client's handshake phase.
    pub fn set_phase(&self, id: Uuid, phase: ClientPhase) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.iter_mut().find(|c| c.id == id) {
            client.phase = phase;
        }
    }

    /// Record a client's declared audio format.
    pub fn set_config(&self, id: Uuid, config: StreamConfig) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.iter_mut().find(|c| c.id == id) {
            client.config = Some(config);
            if client.phase == ClientPhase::Registered {
                client.phase = ClientPhase::Configured;
            }
        }
    }

    /// Queue `bytes` to every ready client except the sender.
    ///
    /// Returns how many clients the frame was queued for.
    pub fn broadcast_from(&self, sender: Uuid, bytes: &Bytes) -> usize {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = 0;
        for client in clients.iter() {
            if client.id != sender && client.is_ready() {
                client.outbound.push(bytes.clone());
                delivered += 1;
            }
        }
        trace!(sender = %sender, delivered, "audio frame fanned out");
        delivered
    }

    /// Queue `bytes` back to one client (heartbeat echo).
    pub fn echo_to(&self, id: Uuid, bytes: Bytes) -> bool {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        match clients.iter().find(|c| c.id == id) {
            Some(client) => {
                client.outbound.push(bytes);
                true
            }
            None => false,
        }
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status snapshot for the CLI.
    pub fn snapshot(&self) -> Vec<ClientSummary> {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients
            .iter()
            .map(|c| ClientSummary {
                id: c.id,
                addr: c.addr,
                phase: c.phase,
                config: c.config,
                dropped_outbound: c.outbound.dropped(),
            })
            .collect()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: Uuid, phase: ClientPhase) -> ClientRecord {
        ClientRecord {
            id,
            addr: "127.0.0.1:9".parse().unwrap(),
            phase,
            config: None,
            outbound: Arc::new(Outbound::new(8)),
        }
    }

    #[tokio::test]
    async fn broadcast_skips_sender_and_unready() {
        let table = SessionTable::new();
        let sender = record(Uuid::new_v4(), ClientPhase::Ready);
        let ready_peer = record(Uuid::new_v4(), ClientPhase::Ready);
        let unready_peer = record(Uuid::new_v4(), ClientPhase::Configured);

        let sender_id = sender.id;
        let sender_q = Arc::clone(&sender.outbound);
        let ready_q = Arc::clone(&ready_peer.outbound);
        let unready_q = Arc::clone(&unready_peer.outbound);

        table.insert(sender);
        table.insert(ready_peer);
        table.insert(unready_peer);

        let frame = Bytes::from_static(b"frame");
        assert_eq!(table.broadcast_from(sender_id, &frame), 1);

        // Only the ready peer has the frame queued.
        assert_eq!(ready_q.pop().await.unwrap(), frame);
        sender_q.close();
        unready_q.close();
        assert!(sender_q.pop().await.is_none());
        assert!(unready_q.pop().await.is_none());
    }

    #[tokio::test]
    async fn outbound_overflow_drops_oldest() {
        let outbound = Outbound::new(2);
        outbound.push(Bytes::from_static(b"a"));
        outbound.push(Bytes::from_static(b"b"));
        outbound.push(Bytes::from_static(b"c"));
        assert_eq!(outbound.dropped(), 1);

        assert_eq!(outbound.pop().await.unwrap(), Bytes::from_static(b"b"));
        assert_eq!(outbound.pop().await.unwrap(), Bytes::from_static(b"c"));
    }

    #[tokio::test]
    async fn closed_outbound_returns_none() {
        let outbound = Arc::new(Outbound::new(2));
        let waiter = Arc::clone(&outbound);
        let handle = tokio::spawn(async move { waiter.pop().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        outbound.close();
        assert!(handle.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_closes_the_outbound_queue() {
        let table = SessionTable::new();
        let id = Uuid::new_v4();
        let rec = record(id, ClientPhase::Ready);
        let outbound = Arc::clone(&rec.outbound);
        table.insert(rec);
        assert_eq!(table.len(), 1);

        table.remove(id);
        assert!(table.is_empty());
        assert!(outbound.pop().await.is_none());
    }
}
