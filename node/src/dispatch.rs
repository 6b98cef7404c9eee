//! Frame dispatch — demultiplexes decoded wire frames by message code.
//!
//! Query frames are answered inline from the local chain; sync responses
//! are routed to the downloader intake; election and big-period frames are
//! forwarded to the coordinator task. Unknown codes are logged and
//! ignored; malformed frames count toward the sender's violation budget
//! and disconnect the session.

use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, RwLock};

use kestrel_chain::BlockChain;
use kestrel_network::{Broadcaster, PeerRegistry};
use kestrel_protocol::messages::{BlockBodies, BlockHeaders, NodeData, Receipts};
use kestrel_protocol::{encode_frame, Message, ProtocolError, RawFrame};
use kestrel_types::NodeId;
use sha2::{Digest, Sha256};

use crate::coordinator::CoordInput;
use crate::downloader::Downloader;
use crate::sync_server;

/// What the reader task should do after a frame was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Continue,
    Disconnect,
}

pub struct Dispatcher {
    main_chain: Arc<StdRwLock<BlockChain>>,
    downloader: Downloader,
    peers: Arc<RwLock<PeerRegistry>>,
    broadcaster: Broadcaster,
    coord_tx: mpsc::Sender<CoordInput>,
}

impl Dispatcher {
    pub fn new(
        main_chain: Arc<StdRwLock<BlockChain>>,
        downloader: Downloader,
        peers: Arc<RwLock<PeerRegistry>>,
        broadcaster: Broadcaster,
        coord_tx: mpsc::Sender<CoordInput>,
    ) -> Self {
        Self {
            main_chain,
            downloader,
            peers,
            broadcaster,
            coord_tx,
        }
    }

    /// Handle one raw frame from `peer_id`.
    pub async fn handle(&self, peer_id: &str, frame: RawFrame) -> DispatchOutcome {
        let message = match frame.decode() {
            Ok(message) => message,
            Err(ProtocolError::UnknownCode(code)) => {
                // Unknown codes on an established session are tolerated.
                tracing::debug!(peer = %peer_id, code, "ignoring unknown message code");
                return DispatchOutcome::Continue;
            }
            Err(e) => {
                tracing::warn!(peer = %peer_id, error = %e, "malformed frame");
                let mut peers = self.peers.write().await;
                peers.record_violation(peer_id, unix_now_secs());
                return DispatchOutcome::Disconnect;
            }
        };

        match message {
            // ── Chain-sync queries, served from the local chain ────────
            Message::GetBlockHeaders(query) => {
                let headers = {
                    let chain = self.main_chain.read().expect("chain lock poisoned");
                    sync_server::serve_headers(&chain, &query)
                };
                self.reply(peer_id, Message::BlockHeaders(BlockHeaders { headers }));
            }
            Message::GetBlockBodies(query) => {
                let bodies = {
                    let chain = self.main_chain.read().expect("chain lock poisoned");
                    sync_server::serve_bodies(&chain, &query.hashes)
                };
                self.reply(peer_id, Message::BlockBodies(BlockBodies { bodies }));
            }
            Message::GetNodeData(query) => {
                let items = {
                    let chain = self.main_chain.read().expect("chain lock poisoned");
                    sync_server::serve_node_data(&chain, &query.hashes)
                };
                self.reply(peer_id, Message::NodeData(NodeData { items }));
            }
            Message::GetReceipts(query) => {
                let receipts = {
                    let chain = self.main_chain.read().expect("chain lock poisoned");
                    sync_server::serve_receipts(&chain, &query.hashes)
                };
                self.reply(peer_id, Message::Receipts(Receipts { receipts }));
            }

            // ── Sync responses, routed to the downloader ───────────────
            Message::BlockHeaders(m) => self.downloader.deliver_headers(peer_id, m.headers),
            Message::BlockBodies(m) => self.downloader.deliver_bodies(peer_id, m.bodies),
            Message::NodeData(m) => self.downloader.deliver_node_data(peer_id, m.items),
            Message::Receipts(m) => self.downloader.deliver_receipts(peer_id, m.receipts),

            // ── Consensus frames, forwarded to the coordinator ─────────
            Message::VoteElectionRequest(req) => {
                self.forward(CoordInput::ElectionRequest {
                    req,
                    peer: peer_id.to_string(),
                });
            }
            Message::VoteElectionResponse(resp) => {
                let from = self.peer_node_id(peer_id).await;
                self.forward(CoordInput::ElectionResponse {
                    resp,
                    peer: peer_id.to_string(),
                    from,
                });
            }
            Message::BroadcastVotedElection(bcast) => {
                self.forward(CoordInput::ElectionBroadcast {
                    bcast,
                    peer: peer_id.to_string(),
                });
            }
            Message::SyncBigPeriodRequest(req) => {
                // The proposal binds a node identity to this connection.
                {
                    let mut peers = self.peers.write().await;
                    peers.mark_connected(peer_id, Some(req.sender), unix_now_secs());
                }
                self.forward(CoordInput::PeriodRequest {
                    req,
                    peer: peer_id.to_string(),
                });
            }
            Message::SyncBigPeriodResponse(resp) => {
                {
                    let mut peers = self.peers.write().await;
                    peers.mark_connected(peer_id, Some(resp.sender), unix_now_secs());
                }
                self.forward(CoordInput::PeriodResponse {
                    resp,
                    peer: peer_id.to_string(),
                });
            }
        }

        DispatchOutcome::Continue
    }

    fn reply(&self, peer_id: &str, message: Message) {
        if !self.broadcaster.send_to(peer_id, encode_frame(&message)) {
            tracing::warn!(peer = %peer_id, code = message.code(), "outbound queue full, reply dropped");
        }
    }

    fn forward(&self, input: CoordInput) {
        if self.coord_tx.try_send(input).is_err() {
            tracing::warn!("coordinator queue full, dropping consensus frame");
        }
    }

    /// Identity used to attribute election responses: the handshaken node
    /// id when known, otherwise a stable hash of the connection address.
    async fn peer_node_id(&self, peer_id: &str) -> NodeId {
        {
            let peers = self.peers.read().await;
            if let Some(state) = peers.get(peer_id) {
                if let Some(node_id) = state.node_id {
                    return node_id;
                }
            }
        }
        let digest = Sha256::digest(peer_id.as_bytes());
        NodeId::new(digest.into())
    }
}

/// Current UNIX timestamp in seconds.
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_chain::block::{Block, Header, TxRoot};
    use kestrel_chain::StateDb;
    use kestrel_protocol::messages::{codes, GetBlockHeaders, HashOrNumber};
    use kestrel_protocol::{decode_frame, wire};
    use kestrel_types::{BlockHash, Timestamp};
    use tokio::sync::mpsc;

    fn empty_chain() -> Arc<StdRwLock<BlockChain>> {
        let state = StateDb::new();
        let genesis = Block {
            header: Header {
                parent_hash: BlockHash::ZERO,
                number: 0,
                timestamp: Timestamp::EPOCH,
                producer: NodeId::ZERO,
                state_root: state.root(),
                tx_root: TxRoot::EMPTY,
                extra: Vec::new(),
            },
            transactions: Vec::new(),
        };
        Arc::new(StdRwLock::new(BlockChain::new(genesis, state)))
    }

    struct Fixture {
        dispatcher: Dispatcher,
        outbound_rx: mpsc::Receiver<(String, Vec<u8>)>,
        coord_rx: mpsc::Receiver<CoordInput>,
        peers: Arc<RwLock<PeerRegistry>>,
    }

    fn fixture() -> Fixture {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (coord_tx, coord_rx) = mpsc::channel(64);
        let peers = Arc::new(RwLock::new(PeerRegistry::new(16)));
        let (downloader, _intake) = Downloader::new();
        let dispatcher = Dispatcher::new(
            empty_chain(),
            downloader,
            peers.clone(),
            Broadcaster::new(outbound_tx),
            coord_tx,
        );
        Fixture {
            dispatcher,
            outbound_rx,
            coord_rx,
            peers,
        }
    }

    fn raw(message: &Message) -> RawFrame {
        RawFrame {
            code: message.code(),
            payload: message.encode_payload(),
        }
    }

    #[tokio::test]
    async fn header_query_answered_inline() {
        let mut f = fixture();
        let query = Message::GetBlockHeaders(GetBlockHeaders {
            origin: HashOrNumber::Number(0),
            amount: 1,
            skip: 0,
            reverse: false,
        });

        let outcome = f.dispatcher.handle("peer:1", raw(&query)).await;
        assert_eq!(outcome, DispatchOutcome::Continue);

        let (peer, frame) = f.outbound_rx.recv().await.unwrap();
        assert_eq!(peer, "peer:1");
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.code, codes::BLOCK_HEADERS);
        match decoded.decode().unwrap() {
            Message::BlockHeaders(m) => assert_eq!(m.headers.len(), 1),
            other => panic!("expected BlockHeaders, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_code_ignored() {
        let f = fixture();
        let outcome = f
            .dispatcher
            .handle(
                "peer:1",
                RawFrame {
                    code: 0x7F,
                    payload: wire::encode(&wire::Item::List(Vec::new())),
                },
            )
            .await;
        assert_eq!(outcome, DispatchOutcome::Continue);
        // No violation recorded.
        let mut peers = f.peers.write().await;
        assert!(!peers.is_banned("peer:1", unix_now_secs()));
    }

    #[tokio::test]
    async fn malformed_frame_disconnects_and_counts_violation() {
        let f = fixture();
        // A vote response smuggling SELECTED: disallowed at decode.
        let item = wire::Item::List(vec![
            wire::Item::uint(1),
            wire::Item::uint(2),
            wire::Item::uint(100),
            wire::Item::uint(2), // SELECTED
            wire::Item::Bytes(vec![0xCC; 32]),
        ]);
        let frame = RawFrame {
            code: codes::VOTE_ELECTION_RESPONSE,
            payload: wire::encode(&item),
        };

        for i in 0..3 {
            let outcome = f.dispatcher.handle("peer:1", frame.clone()).await;
            assert_eq!(outcome, DispatchOutcome::Disconnect, "attempt {i}");
        }
        // Third violation within the hour banned the peer.
        let mut peers = f.peers.write().await;
        assert!(peers.is_banned("peer:1", unix_now_secs()));
    }

    #[tokio::test]
    async fn election_frames_forwarded_to_coordinator() {
        let mut f = fixture();
        let req = Message::VoteElectionRequest(kestrel_protocol::messages::VoteElectionRequest {
            round: 1,
            tickets: 9,
            active_time: Timestamp::new(100),
            sender: NodeId::new([1u8; 32]),
        });
        f.dispatcher.handle("peer:1", raw(&req)).await;

        match f.coord_rx.recv().await.unwrap() {
            CoordInput::ElectionRequest { req, peer } => {
                assert_eq!(req.tickets, 9);
                assert_eq!(peer, "peer:1");
            }
            other => panic!("expected ElectionRequest, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sync_request_learns_peer_identity() {
        let mut f = fixture();
        let sender = NodeId::new([5u8; 32]);
        let req = Message::SyncBigPeriodRequest(kestrel_protocol::messages::SyncBigPeriodRequest {
            round: 1,
            active_time: Timestamp::new(100),
            delegated_nodes: vec!["aa".into()],
            signature: kestrel_types::Signature([0u8; 64]),
            sender,
            signer_pubkey: kestrel_types::PublicKey([0u8; 32]),
        });
        f.dispatcher.handle("peer:1", raw(&req)).await;
        let _ = f.coord_rx.recv().await.unwrap();

        let peers = f.peers.read().await;
        assert_eq!(peers.get("peer:1").unwrap().node_id, Some(sender));
    }
}
