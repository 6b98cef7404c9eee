//! Peer sessions: one reader task and one writer task per peer.
//!
//! The reader blocks on the wire and hands decoded frames to the dispatch
//! layer. Each peer's writer task drains a bounded per-peer queue onto the
//! TCP write half; the shared outbound queue is only a router that fans
//! frames out to those per-peer queues, so a slow peer never stalls
//! anyone else.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc, RwLock};

use kestrel_network::PeerRegistry;
use kestrel_protocol::read_frame;

use crate::dispatch::{DispatchOutcome, Dispatcher};

/// Idle read timeout for peer connections.
const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-write timeout in a peer's writer task.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Capacity of each peer's outbound queue.
const PEER_QUEUE_CAPACITY: usize = 256;
/// Bounded time to flush queued writes during shutdown.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry of per-peer outbound queues, enabling the router to hand
/// frames to the right writer task.
pub struct ConnectionRegistry {
    queues: HashMap<String, mpsc::Sender<Vec<u8>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
        }
    }

    /// Register a peer's outbound queue. A previous entry for this peer
    /// is replaced; dropping the old sender ends its writer task.
    pub fn insert(&mut self, peer_id: String, queue: mpsc::Sender<Vec<u8>>) {
        self.queues.insert(peer_id, queue);
    }

    pub fn remove(&mut self, peer_id: &str) -> Option<mpsc::Sender<Vec<u8>>> {
        self.queues.remove(peer_id)
    }

    pub fn get(&self, peer_id: &str) -> Option<mpsc::Sender<Vec<u8>>> {
        self.queues.get(peer_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the writer task for one peer.
///
/// Returns the bounded queue feeding it. The task drains the queue onto
/// the write half and exits when the queue closes or shutdown fires; on
/// shutdown it flushes what is already queued under
/// [`SHUTDOWN_DRAIN_TIMEOUT`].
pub fn spawn_peer_writer(
    peer_id: String,
    mut writer: OwnedWriteHalf,
    mut shutdown: broadcast::Receiver<()>,
) -> (mpsc::Sender<Vec<u8>>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(PEER_QUEUE_CAPACITY);
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if !write_with_timeout(&peer_id, &mut writer, &frame).await {
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
                    while let Ok(frame) = rx.try_recv() {
                        if tokio::time::Instant::now() >= deadline {
                            tracing::warn!(peer = %peer_id, "shutdown drain timed out");
                            break;
                        }
                        if !write_with_timeout(&peer_id, &mut writer, &frame).await {
                            break;
                        }
                    }
                    break;
                }
            }
        }
        tracing::debug!(peer = %peer_id, "peer writer stopped");
    });
    (tx, handle)
}

async fn write_with_timeout(peer_id: &str, writer: &mut OwnedWriteHalf, frame: &[u8]) -> bool {
    let write = async {
        writer.write_all(frame).await?;
        writer.flush().await
    };
    match tokio::time::timeout(WRITE_TIMEOUT, write).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(peer = %peer_id, error = %e, "write failed");
            false
        }
        Err(_) => {
            tracing::warn!(peer = %peer_id, "write timed out");
            false
        }
    }
}

/// Spawn the outbound router: moves `(peer_id, frame)` entries from the
/// shared queue into the addressed peer's own queue. A full peer queue
/// drops the frame for that peer only.
pub fn spawn_outbound_router(
    mut outbound_rx: mpsc::Receiver<(String, Vec<u8>)>,
    registry: Arc<RwLock<ConnectionRegistry>>,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                entry = outbound_rx.recv() => {
                    let Some((peer_id, frame)) = entry else { break };
                    route_one(&registry, &peer_id, frame).await;
                }
                _ = shutdown.recv() => {
                    while let Ok((peer_id, frame)) = outbound_rx.try_recv() {
                        route_one(&registry, &peer_id, frame).await;
                    }
                    break;
                }
            }
        }
        tracing::debug!("outbound router stopped");
    })
}

async fn route_one(registry: &RwLock<ConnectionRegistry>, peer_id: &str, frame: Vec<u8>) {
    let queue = {
        let registry = registry.read().await;
        registry.get(peer_id)
    };
    let Some(queue) = queue else {
        tracing::trace!(peer = %peer_id, "dropping frame for unknown connection");
        return;
    };
    if queue.try_send(frame).is_err() {
        tracing::warn!(peer = %peer_id, "peer queue full, dropping frame");
    }
}

/// Spawn a reader task for one peer: reads frames until error, violation
/// disconnect, or shutdown, then cleans the peer out of the registries.
pub fn spawn_peer_read_loop(
    peer_id: String,
    mut reader: OwnedReadHalf,
    dispatcher: Arc<Dispatcher>,
    connections: Arc<RwLock<ConnectionRegistry>>,
    peers: Arc<RwLock<PeerRegistry>>,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                read = tokio::time::timeout(READ_TIMEOUT, read_frame(&mut reader)) => {
                    match read {
                        Ok(Ok(frame)) => frame,
                        Ok(Err(e)) => {
                            tracing::debug!(peer = %peer_id, error = %e, "peer read ended");
                            break;
                        }
                        Err(_) => {
                            tracing::debug!(peer = %peer_id, "peer idle timeout");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => break,
            };

            match dispatcher.handle(&peer_id, frame).await {
                DispatchOutcome::Continue => {}
                DispatchOutcome::Disconnect => {
                    tracing::info!(peer = %peer_id, "disconnecting peer after violation");
                    break;
                }
            }
        }

        {
            let mut connections = connections.write().await;
            connections.remove(&peer_id);
        }
        {
            let mut peers = peers.write().await;
            peers.mark_disconnected(&peer_id);
        }
        tracing::debug!(peer = %peer_id, "peer session cleaned up");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn tcp_pair() -> (tokio::net::TcpStream, tokio::net::TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn writer_task_writes_queued_frames() {
        let (client, server) = tcp_pair().await;
        let (_read, write) = client.into_split();
        let (shutdown_tx, _) = broadcast::channel(1);

        let (queue, _handle) =
            spawn_peer_writer("peer".into(), write, shutdown_tx.subscribe());
        queue.send(vec![1, 2, 3]).await.unwrap();

        let mut buf = [0u8; 3];
        let mut server = server;
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[tokio::test]
    async fn router_moves_frames_to_peer_queue() {
        let (client, server) = tcp_pair().await;
        let (_read, write) = client.into_split();
        let (shutdown_tx, _) = broadcast::channel(1);

        let registry = Arc::new(RwLock::new(ConnectionRegistry::new()));
        let (queue, _writer) =
            spawn_peer_writer("a:1".into(), write, shutdown_tx.subscribe());
        registry.write().await.insert("a:1".into(), queue);

        let (tx, rx) = mpsc::channel(16);
        let _router = spawn_outbound_router(rx, registry, shutdown_tx.subscribe());

        tx.send(("a:1".to_string(), vec![9, 8, 7])).await.unwrap();

        let mut buf = [0u8; 3];
        let mut server = server;
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [9, 8, 7]);
    }

    #[tokio::test]
    async fn router_stops_on_shutdown() {
        let registry = Arc::new(RwLock::new(ConnectionRegistry::new()));
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = spawn_outbound_router(rx, registry, shutdown_rx);
        // A frame for a peer with no connection is dropped silently.
        tx.send(("nobody:1".to_string(), vec![1])).await.unwrap();
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("router should stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn registry_replaces_queue() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);
        registry.insert("peer".into(), tx1);
        registry.insert("peer".into(), tx2);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("peer").is_some());
        assert!(registry.is_empty());
    }
}
