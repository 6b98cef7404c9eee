//! Flood-based message broadcasting.
//!
//! The [`Broadcaster`] does not write directly to TCP streams. It pushes
//! `(peer_id, frame_bytes)` tuples onto an `mpsc` channel that the
//! connection layer drains, so broadcasting never blocks on a slow peer.

use tokio::sync::mpsc;

/// Outcome of a broadcast attempt.
#[derive(Clone, Debug, Default)]
pub struct BroadcastResult {
    /// Number of peers the frame was successfully queued for.
    pub sent: usize,
    /// Number of peers for which queueing failed (channel full / closed).
    pub failed: usize,
}

/// Queue-based broadcaster.
#[derive(Clone)]
pub struct Broadcaster {
    outbound_tx: mpsc::Sender<(String, Vec<u8>)>,
}

impl Broadcaster {
    pub fn new(outbound_tx: mpsc::Sender<(String, Vec<u8>)>) -> Self {
        Self { outbound_tx }
    }

    /// Queue a frame for every listed peer.
    pub fn broadcast(&self, frame: &[u8], peers: &[String]) -> BroadcastResult {
        let mut result = BroadcastResult::default();
        for peer_id in peers {
            match self.outbound_tx.try_send((peer_id.clone(), frame.to_vec())) {
                Ok(()) => result.sent += 1,
                Err(_) => result.failed += 1,
            }
        }
        result
    }

    /// Queue a frame for one peer. Returns `false` if the queue is full
    /// or closed.
    pub fn send_to(&self, peer_id: &str, frame: Vec<u8>) -> bool {
        self.outbound_tx.try_send((peer_id.to_string(), frame)).is_ok()
    }
}
