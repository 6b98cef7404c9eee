//! Big-period synchronization of the delegated producer set.
//!
//! Once per big-period length the synchronizer re-derives the candidate
//! list from the ballot contract, signs it, and floods a proposal. The
//! receiver rules (round window, activation-time tiebreak, lexicographic
//! proposer tiebreak) drive every peer to an identical ordered set; a
//! proposal that survives a whole interval undisplaced is confirmed.

use crate::ballot::{Candidate, DelegatorAccessor};
use crate::clock::SharedClock;
use kestrel_crypto::{node_id_from_public, sign_message, verify_signature};
use kestrel_protocol::messages::{SyncBigPeriodRequest, SyncBigPeriodResponse};
use kestrel_protocol::wire::encode_node_list;
use kestrel_protocol::PeriodState;
use kestrel_types::{KeyPair, NodeId, PublicKey, Signature, Timestamp};
use std::sync::Arc;

/// The live big period. Replaced wholesale — on adoption of a foreign
/// proposal or when a new local proposal starts the next round.
#[derive(Clone, Debug)]
pub struct BigPeriod {
    pub round: u64,
    /// When `delegated_nodes` becomes authoritative for block production.
    pub active_time: Timestamp,
    /// Hex node ids in canonical (lexicographic) order.
    pub delegated_nodes: Vec<String>,
    /// Proposer's signature over the canonical encoding of the node list.
    pub signature: Signature,
    pub proposer: NodeId,
    pub proposer_pubkey: PublicKey,
    pub state: PeriodState,
}

impl BigPeriod {
    fn bootstrap() -> Self {
        Self {
            round: 0,
            active_time: Timestamp::EPOCH,
            delegated_nodes: Vec::new(),
            signature: Signature([0u8; 64]),
            proposer: NodeId::ZERO,
            proposer_pubkey: PublicKey([0u8; 32]),
            state: PeriodState::Init,
        }
    }
}

/// Effects the caller must apply after feeding the synchronizer an input.
#[derive(Clone, Debug)]
pub enum PeriodEffect {
    /// Unicast reply to the frame's sender.
    Reply(SyncBigPeriodResponse),
    /// Flood the proposal to all connected peers.
    Broadcast(SyncBigPeriodRequest),
    /// The period reached CONFIRMED; its set is now the election
    /// authority.
    Confirmed {
        round: u64,
        active_time: Timestamp,
        delegated_nodes: Vec<String>,
    },
}

pub struct PeriodSynchronizer {
    local_id: NodeId,
    keypair: KeyPair,
    accessor: Arc<dyn DelegatorAccessor>,
    clock: SharedClock,
    period_interval_secs: u64,

    period: BigPeriod,
    candidates: Vec<Candidate>,
}

impl PeriodSynchronizer {
    pub fn new(
        keypair: KeyPair,
        accessor: Arc<dyn DelegatorAccessor>,
        clock: SharedClock,
        period_interval_secs: u64,
    ) -> Self {
        let local_id = node_id_from_public(&keypair.public);
        Self {
            local_id,
            keypair,
            accessor,
            clock,
            period_interval_secs,
            period: BigPeriod::bootstrap(),
            candidates: Vec::new(),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Snapshot of the live period.
    pub fn period(&self) -> BigPeriod {
        self.period.clone()
    }

    /// Candidates from the latest successful refresh.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// The local node's ticket count per the latest refresh.
    pub fn local_tickets(&self) -> u64 {
        let local_hex = self.local_id.to_hex();
        self.candidates
            .iter()
            .find(|c| c.node_id == local_hex)
            .map(|c| c.ticket)
            .unwrap_or(0)
    }

    /// Timer input, fired once per big-period length.
    ///
    /// Confirms the pending proposal if it survived the whole interval,
    /// then refreshes the candidate list and proposes the next period.
    /// An unreachable ballot contract keeps the current period and retries
    /// on the next tick.
    pub fn sync_delegated_nodes(&mut self) -> Vec<PeriodEffect> {
        let now = self.clock.now();
        let mut effects = Vec::new();

        if self.period.round > 0 && self.period.state == PeriodState::Init {
            // Survived an entire interval without displacement.
            self.period.state = PeriodState::Confirmed;
            effects.push(self.confirmed_effect());
        }

        if self.period.round > 0 && now < self.period.active_time {
            // The current period has not activated yet; nothing to propose.
            return effects;
        }

        let candidates = match self.accessor.refresh() {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "ballot refresh failed, keeping current period");
                return effects;
            }
        };
        self.candidates = candidates;

        let ids: Vec<String> = self.candidates.iter().map(|c| c.node_id.clone()).collect();
        let signature = sign_message(&encode_node_list(&ids), &self.keypair.private);

        self.period = BigPeriod {
            round: self.period.round + 1,
            active_time: now.plus(self.period_interval_secs),
            delegated_nodes: ids,
            signature,
            proposer: self.local_id,
            proposer_pubkey: self.keypair.public.clone(),
            state: PeriodState::Init,
        };

        tracing::info!(
            round = self.period.round,
            delegators = self.period.delegated_nodes.len(),
            active = %self.period.active_time,
            "proposing next big period"
        );
        effects.push(PeriodEffect::Broadcast(self.request_frame()));
        effects
    }

    /// A peer proposed a period set.
    pub fn handle_request(&mut self, req: &SyncBigPeriodRequest) -> Vec<PeriodEffect> {
        if self.outside_round_window(req.round) {
            tracing::debug!(got = req.round, local = self.period.round, "sync round out of window");
            return Vec::new();
        }
        if !verify_node_list(
            &req.delegated_nodes,
            &req.signature,
            &req.signer_pubkey,
            Some(&req.sender),
        ) {
            return Vec::new();
        }

        let mut effects = Vec::new();
        let adopt = req.round > self.period.round
            || (req.round == self.period.round && self.loses_tiebreak(req.active_time, &req.sender));
        if adopt {
            self.adopt(
                req.round,
                req.active_time,
                req.delegated_nodes.clone(),
                req.signature.clone(),
                req.signer_pubkey.clone(),
            );
            effects.push(self.confirmed_effect());
        }

        effects.push(PeriodEffect::Reply(self.response_frame()));
        effects
    }

    /// A peer replied with its period view.
    pub fn handle_response(&mut self, resp: &SyncBigPeriodResponse) -> Vec<PeriodEffect> {
        if self.outside_round_window(resp.round) {
            return Vec::new();
        }
        if !verify_node_list(
            &resp.delegated_nodes,
            &resp.signature,
            &resp.signer_pubkey,
            None,
        ) {
            return Vec::new();
        }
        let proposer = node_id_from_public(&resp.signer_pubkey);

        let adopt = resp.round > self.period.round
            || (resp.round == self.period.round
                && resp.state == PeriodState::Confirmed
                && resp.delegated_nodes != self.period.delegated_nodes
                && self.loses_tiebreak(resp.active_time, &proposer));
        if adopt {
            self.adopt(
                resp.round,
                resp.active_time,
                resp.delegated_nodes.clone(),
                resp.signature.clone(),
                resp.signer_pubkey.clone(),
            );
            return vec![self.confirmed_effect()];
        }
        Vec::new()
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn outside_round_window(&self, round: u64) -> bool {
        round + 1 < self.period.round || round > self.period.round + 1
    }

    /// Whether the local period loses the adoption tiebreak to an incoming
    /// proposal with the given activation time and proposer.
    fn loses_tiebreak(&self, active_time: Timestamp, proposer: &NodeId) -> bool {
        active_time > self.period.active_time
            || (active_time == self.period.active_time && *proposer > self.period.proposer)
    }

    fn adopt(
        &mut self,
        round: u64,
        active_time: Timestamp,
        delegated_nodes: Vec<String>,
        signature: Signature,
        proposer_pubkey: PublicKey,
    ) {
        let proposer = node_id_from_public(&proposer_pubkey);
        tracing::info!(
            round,
            %proposer,
            delegators = delegated_nodes.len(),
            "adopting peer big-period set"
        );
        self.period = BigPeriod {
            round,
            active_time,
            delegated_nodes,
            signature,
            proposer,
            proposer_pubkey,
            state: PeriodState::Confirmed,
        };
    }

    fn confirmed_effect(&self) -> PeriodEffect {
        PeriodEffect::Confirmed {
            round: self.period.round,
            active_time: self.period.active_time,
            delegated_nodes: self.period.delegated_nodes.clone(),
        }
    }

    fn request_frame(&self) -> SyncBigPeriodRequest {
        SyncBigPeriodRequest {
            round: self.period.round,
            active_time: self.period.active_time,
            delegated_nodes: self.period.delegated_nodes.clone(),
            signature: self.period.signature.clone(),
            sender: self.local_id,
            signer_pubkey: self.period.proposer_pubkey.clone(),
        }
    }

    fn response_frame(&self) -> SyncBigPeriodResponse {
        SyncBigPeriodResponse {
            round: self.period.round,
            active_time: self.period.active_time,
            delegated_nodes: self.period.delegated_nodes.clone(),
            signature: self.period.signature.clone(),
            state: self.period.state,
            sender: self.local_id,
            signer_pubkey: self.period.proposer_pubkey.clone(),
        }
    }
}

/// Verify a signed node list. When `expected_sender` is given (requests),
/// additionally require the signer key to hash to the claimed sender id.
fn verify_node_list(
    nodes: &[String],
    signature: &Signature,
    signer_pubkey: &PublicKey,
    expected_sender: Option<&NodeId>,
) -> bool {
    if let Some(sender) = expected_sender {
        if node_id_from_public(signer_pubkey) != *sender {
            tracing::warn!(%sender, "sync frame signer key does not match sender id");
            return false;
        }
    }
    if !verify_signature(&encode_node_list(nodes), signature, signer_pubkey) {
        tracing::warn!("dropping sync frame with invalid node-list signature");
        return false;
    }
    true
}
