//! Peer connection tracking, violation budgets, and banning.

use kestrel_types::NodeId;
use std::collections::{HashMap, VecDeque};

/// Protocol violations tolerated inside one window before a ban.
const VIOLATION_LIMIT: usize = 3;
/// Sliding window over which violations are counted (1 hour).
const VIOLATION_WINDOW_SECS: u64 = 3600;
/// Duration of a ban (1 hour).
const BAN_DURATION_SECS: u64 = 3600;

/// Per-peer metadata tracked by the [`PeerRegistry`].
#[derive(Clone, Debug)]
pub struct PeerState {
    /// Dial address, `"ip:port"`.
    pub address: String,
    /// Node identity learned during the handshake, if any.
    pub node_id: Option<NodeId>,
    pub connected: bool,
    pub last_seen_secs: u64,
    /// Timestamps (seconds) of recent protocol violations.
    violations: VecDeque<u64>,
    /// Unix timestamp (seconds) when the ban expires, if banned.
    ban_until_secs: Option<u64>,
}

impl PeerState {
    fn new(address: String) -> Self {
        Self {
            address,
            node_id: None,
            connected: false,
            last_seen_secs: 0,
            violations: VecDeque::new(),
            ban_until_secs: None,
        }
    }
}

/// Central registry of known peers, keyed by `"ip:port"`.
pub struct PeerRegistry {
    peers: HashMap<String, PeerState>,
    max_peers: usize,
}

impl PeerRegistry {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: HashMap::new(),
            max_peers,
        }
    }

    /// Register a peer address. No-op if already known or at capacity.
    pub fn add_peer(&mut self, address: &str) {
        if self.peers.len() >= self.max_peers {
            return;
        }
        self.peers
            .entry(address.to_string())
            .or_insert_with(|| PeerState::new(address.to_string()));
    }

    pub fn mark_connected(&mut self, address: &str, node_id: Option<NodeId>, now_secs: u64) {
        let peer = self
            .peers
            .entry(address.to_string())
            .or_insert_with(|| PeerState::new(address.to_string()));
        peer.connected = true;
        peer.last_seen_secs = now_secs;
        if node_id.is_some() {
            peer.node_id = node_id;
        }
    }

    pub fn mark_disconnected(&mut self, address: &str) {
        if let Some(peer) = self.peers.get_mut(address) {
            peer.connected = false;
        }
    }

    /// Update last-seen for idle detection.
    pub fn touch(&mut self, address: &str, now_secs: u64) {
        if let Some(peer) = self.peers.get_mut(address) {
            peer.last_seen_secs = now_secs;
        }
    }

    /// Record a protocol violation. Returns `true` if this violation
    /// tripped the budget and the peer is now banned.
    pub fn record_violation(&mut self, address: &str, now_secs: u64) -> bool {
        let peer = self
            .peers
            .entry(address.to_string())
            .or_insert_with(|| PeerState::new(address.to_string()));

        let window_start = now_secs.saturating_sub(VIOLATION_WINDOW_SECS);
        while peer
            .violations
            .front()
            .is_some_and(|&t| t < window_start)
        {
            peer.violations.pop_front();
        }
        peer.violations.push_back(now_secs);

        if peer.violations.len() >= VIOLATION_LIMIT {
            peer.ban_until_secs = Some(now_secs + BAN_DURATION_SECS);
            peer.connected = false;
            peer.violations.clear();
            tracing::warn!(peer = %address, "peer banned after repeated protocol violations");
            true
        } else {
            false
        }
    }

    /// Whether the peer is currently banned. Expired bans are cleared.
    pub fn is_banned(&mut self, address: &str, now_secs: u64) -> bool {
        let Some(peer) = self.peers.get_mut(address) else {
            return false;
        };
        match peer.ban_until_secs {
            Some(until) if now_secs < until => true,
            Some(_) => {
                peer.ban_until_secs = None;
                false
            }
            None => false,
        }
    }

    pub fn get(&self, address: &str) -> Option<&PeerState> {
        self.peers.get(address)
    }

    /// Addresses of connected, unbanned peers.
    pub fn connected_peers(&self) -> Vec<String> {
        self.peers
            .values()
            .filter(|p| p.connected && p.ban_until_secs.is_none())
            .map(|p| p.address.clone())
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.connected && p.ban_until_secs.is_none())
            .count()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
