//! The coordinator task: serializes every consensus input — timer ticks,
//! decoded frames, shutdown — onto one long-running task that owns the
//! election manager, the period synchronizer, and the packager.
//!
//! Timers are plain tasks feeding typed inputs into the same channel as
//! the dispatch layer, so the state machines see one ordered stream.

use std::sync::{Arc, RwLock as StdRwLock};

use tokio::sync::{broadcast, mpsc, RwLock};

use kestrel_chain::{BlockChain, ChainEvent, EventBus};
use kestrel_consensus::{
    ElectionEffect, ElectionManager, Packager, PeriodEffect, PeriodSynchronizer,
};
use kestrel_network::{Broadcaster, PeerRegistry};
use kestrel_protocol::messages::{
    BroadcastVotedElection, SyncBigPeriodRequest, SyncBigPeriodResponse, VoteElectionRequest,
    VoteElectionResponse,
};
use kestrel_protocol::{encode_frame, Message};
use kestrel_types::NodeId;

/// Inputs serialized onto the coordinator task.
#[derive(Debug)]
pub enum CoordInput {
    ElectionRequest {
        req: VoteElectionRequest,
        peer: String,
    },
    ElectionResponse {
        resp: VoteElectionResponse,
        peer: String,
        from: NodeId,
    },
    ElectionBroadcast {
        bcast: BroadcastVotedElection,
        peer: String,
    },
    PeriodRequest {
        req: SyncBigPeriodRequest,
        peer: String,
    },
    PeriodResponse {
        resp: SyncBigPeriodResponse,
        peer: String,
    },
    /// Start the next election round.
    ElectionTimer,
    /// Big-period tick: refresh, propose, confirm.
    PeriodTimer,
    /// Quiet-interval poll for the election state machine.
    QuietTick,
}

pub struct Coordinator {
    local_id: NodeId,
    election: ElectionManager,
    synchronizer: PeriodSynchronizer,
    packager: Packager,
    events: EventBus,
    broadcaster: Broadcaster,
    peers: Arc<RwLock<PeerRegistry>>,
    main_chain: Arc<StdRwLock<BlockChain>>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_id: NodeId,
        election: ElectionManager,
        synchronizer: PeriodSynchronizer,
        packager: Packager,
        events: EventBus,
        broadcaster: Broadcaster,
        peers: Arc<RwLock<PeerRegistry>>,
        main_chain: Arc<StdRwLock<BlockChain>>,
    ) -> Self {
        Self {
            local_id,
            election,
            synchronizer,
            packager,
            events,
            broadcaster,
            peers,
            main_chain,
        }
    }

    /// Run until the input channel closes or shutdown fires.
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<CoordInput>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                input = inputs.recv() => {
                    let Some(input) = input else { break };
                    self.apply(input).await;
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("coordinator stopped");
    }

    /// Apply one input and carry out the resulting effects.
    pub async fn apply(&mut self, input: CoordInput) {
        match input {
            CoordInput::ElectionTimer => {
                let effects = self.election.schedule_electing();
                self.apply_election_effects(effects, None).await;
            }
            CoordInput::QuietTick => {
                let effects = self.election.on_tick();
                self.apply_election_effects(effects, None).await;
            }
            CoordInput::PeriodTimer => {
                let effects = self.synchronizer.sync_delegated_nodes();
                self.apply_period_effects(effects, None).await;
            }
            CoordInput::ElectionRequest { req, peer } => {
                let effects = self.election.handle_request(&req);
                self.apply_election_effects(effects, Some(&peer)).await;
            }
            CoordInput::ElectionResponse { resp, peer, from } => {
                let effects = self.election.handle_response(&resp, from);
                self.apply_election_effects(effects, Some(&peer)).await;
            }
            CoordInput::ElectionBroadcast { bcast, peer } => {
                let effects = self.election.handle_broadcast(&bcast);
                self.apply_election_effects(effects, Some(&peer)).await;
            }
            CoordInput::PeriodRequest { req, peer } => {
                let effects = self.synchronizer.handle_request(&req);
                self.apply_period_effects(effects, Some(&peer)).await;
            }
            CoordInput::PeriodResponse { resp, peer } => {
                let effects = self.synchronizer.handle_response(&resp);
                self.apply_period_effects(effects, Some(&peer)).await;
            }
        }
    }

    async fn apply_election_effects(
        &mut self,
        effects: Vec<ElectionEffect>,
        reply_to: Option<&str>,
    ) {
        for effect in effects {
            match effect {
                ElectionEffect::Reply(resp) => {
                    let Some(peer) = reply_to else {
                        tracing::warn!("election reply with no peer to address");
                        continue;
                    };
                    self.send_to(peer, Message::VoteElectionResponse(resp));
                }
                ElectionEffect::Propose(req) => {
                    self.flood(Message::VoteElectionRequest(req)).await;
                }
                ElectionEffect::Broadcast(bcast) => {
                    self.flood(Message::BroadcastVotedElection(bcast)).await;
                }
                ElectionEffect::Decided { round, node_id } => {
                    tracing::info!(round, winner = %node_id, "election round decided");
                    self.events
                        .publish(ChainEvent::ElectionDecided { round, node_id });
                    if node_id == self.local_id {
                        self.package_blocks(round);
                    }
                }
            }
        }
    }

    async fn apply_period_effects(&mut self, effects: Vec<PeriodEffect>, reply_to: Option<&str>) {
        for effect in effects {
            match effect {
                PeriodEffect::Reply(resp) => {
                    let Some(peer) = reply_to else {
                        tracing::warn!("period reply with no peer to address");
                        continue;
                    };
                    self.send_to(peer, Message::SyncBigPeriodResponse(resp));
                }
                PeriodEffect::Broadcast(req) => {
                    self.flood(Message::SyncBigPeriodRequest(req)).await;
                }
                PeriodEffect::Confirmed {
                    round,
                    active_time,
                    delegated_nodes,
                } => {
                    tracing::info!(
                        round,
                        delegators = delegated_nodes.len(),
                        "big period confirmed"
                    );
                    self.election
                        .set_delegators(delegated_nodes, true, active_time);
                    self.election
                        .set_local_tickets(self.synchronizer.local_tickets());
                }
            }
        }
    }

    /// Package blocks now that this node is the round's election node.
    fn package_blocks(&self, round: u64) {
        let height = {
            let chain = self.main_chain.read().expect("chain lock poisoned");
            chain.height() + 1
        };
        match self.packager.generate_new_block(height, self.local_id) {
            Ok(outcome) if outcome.skipped => {
                tracing::debug!(round, "packaging skipped, head already current");
            }
            Ok(outcome) => {
                for (chain, error) in &outcome.failed {
                    tracing::warn!(%chain, error, "chain failed during packaging");
                }
            }
            Err(e) => {
                tracing::error!(round, error = %e, "packaging failed");
            }
        }
    }

    fn send_to(&self, peer: &str, message: Message) {
        if !self.broadcaster.send_to(peer, encode_frame(&message)) {
            tracing::warn!(peer, code = message.code(), "outbound queue full");
        }
    }

    async fn flood(&self, message: Message) {
        let peers = {
            let peers = self.peers.read().await;
            peers.connected_peers()
        };
        if peers.is_empty() {
            return;
        }
        let frame = encode_frame(&message);
        let result = self.broadcaster.broadcast(&frame, &peers);
        if result.failed > 0 {
            tracing::warn!(
                code = message.code(),
                failed = result.failed,
                "broadcast partially failed"
            );
        }
    }
}
