//! Election state machine — chooses one election node per round.
//!
//! The manager is a pure synchronous state machine: every input (a
//! scheduled round, a received frame, a timer tick) returns the list of
//! effects the caller must carry out — replies to unicast, broadcasts to
//! flood, and decision events to publish. The owning task serializes all
//! calls, so no internal locking is needed.

use crate::clock::SharedClock;
use kestrel_protocol::messages::{
    BroadcastVotedElection, VoteElectionRequest, VoteElectionResponse,
};
use kestrel_protocol::VoteState;
use kestrel_types::{NodeId, Timestamp};
use std::collections::HashSet;

/// Lifecycle of one election round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionState {
    /// Searching for the round's election node.
    Looking,
    /// The round has converged. Terminal until the next round.
    Selected,
}

/// The live election round. Replaced, never mutated, on round change.
#[derive(Clone, Debug)]
pub struct ElectionInfo {
    pub round: u64,
    pub state: ElectionState,
    pub election_tickets: u64,
    pub active_time: Timestamp,
    pub election_node: Option<NodeId>,
}

/// Effects the caller must apply after feeding the manager an input.
#[derive(Clone, Debug)]
pub enum ElectionEffect {
    /// Unicast reply to the frame's sender.
    Reply(VoteElectionResponse),
    /// Flood to all connected peers.
    Broadcast(BroadcastVotedElection),
    /// Flood the local candidacy (start of a round).
    Propose(VoteElectionRequest),
    /// Publish `ElectionDecided` on the event bus.
    Decided { round: u64, node_id: NodeId },
}

pub struct ElectionManager {
    local_id: NodeId,
    local_tickets: u64,
    quiet_interval_secs: u64,
    clock: SharedClock,

    info: ElectionInfo,
    /// Delegators (hex ids) of the confirmed big period.
    delegators: Vec<String>,
    delegators_confirmed: bool,
    period_active_time: Timestamp,

    /// Peers that agreed to our candidacy this round.
    agrees: HashSet<NodeId>,
    /// Highest (tickets, id) credential seen this round.
    best_tickets: u64,
    best_node: NodeId,
    last_activity: Timestamp,
    last_decided: Option<(u64, NodeId)>,
}

impl ElectionManager {
    pub fn new(local_id: NodeId, clock: SharedClock, quiet_interval_secs: u64) -> Self {
        let now = clock.now();
        Self {
            local_id,
            local_tickets: 0,
            quiet_interval_secs,
            clock,
            info: ElectionInfo {
                round: 0,
                state: ElectionState::Looking,
                election_tickets: 0,
                active_time: Timestamp::EPOCH,
                election_node: None,
            },
            delegators: Vec::new(),
            delegators_confirmed: false,
            period_active_time: Timestamp::EPOCH,
            agrees: HashSet::new(),
            best_tickets: 0,
            best_node: local_id,
            last_activity: now,
            last_decided: None,
        }
    }

    /// Snapshot of the live round.
    pub fn info(&self) -> ElectionInfo {
        self.info.clone()
    }

    /// Update the local ticket count (from the latest candidate refresh).
    pub fn set_local_tickets(&mut self, tickets: u64) {
        self.local_tickets = tickets;
    }

    /// Install the confirmed delegator set from the big-period
    /// synchronizer. This is the authority for who may be election node
    /// and for the majority count.
    pub fn set_delegators(
        &mut self,
        nodes: Vec<String>,
        confirmed: bool,
        active_time: Timestamp,
    ) {
        self.delegators = nodes;
        self.delegators_confirmed = confirmed;
        self.period_active_time = active_time;
    }

    /// Start the next round: increments `round`, resets to LOOKING, and
    /// proposes the local candidacy. With no other delegators in sight the
    /// node trivially wins its own round.
    pub fn schedule_electing(&mut self) -> Vec<ElectionEffect> {
        let round = self.info.round + 1;
        self.enter_round(round);

        if !self.may_elect(&self.local_id) {
            tracing::debug!(round, "not in confirmed delegator set, sitting out");
            return Vec::new();
        }

        if !self.has_other_delegators() {
            return self.select_self();
        }

        vec![ElectionEffect::Propose(VoteElectionRequest {
            round: self.info.round,
            tickets: self.local_tickets,
            active_time: self.info.active_time,
            sender: self.local_id,
        })]
    }

    /// A peer proposed itself with its ticket count.
    pub fn handle_request(&mut self, req: &VoteElectionRequest) -> Vec<ElectionEffect> {
        if req.active_time != self.info.active_time {
            tracing::debug!(
                got = %req.active_time,
                want = %self.info.active_time,
                "dropping vote request with mismatched active time"
            );
            return Vec::new();
        }

        if req.round < self.info.round {
            return vec![ElectionEffect::Reply(VoteElectionResponse {
                round: self.info.round,
                tickets: self.local_tickets,
                active_time: self.info.active_time,
                state: VoteState::MismatchedRound,
                node_id: self.local_id,
            })];
        }

        if req.round > self.info.round {
            self.enter_round(req.round);
        }

        if self.info.state == ElectionState::Selected {
            // Echo the current selection; no state change.
            let winner = self.info.election_node.expect("selected round has a winner");
            return vec![ElectionEffect::Reply(VoteElectionResponse {
                round: self.info.round,
                tickets: self.info.election_tickets,
                active_time: self.info.active_time,
                state: VoteState::Agree,
                node_id: winner,
            })];
        }

        self.last_activity = self.clock.now();
        self.note_credential(req.tickets, req.sender);

        if beats(req.tickets, &req.sender, self.local_tickets, &self.local_id) {
            // Concede: the requester carries the stronger credential.
            self.info.state = ElectionState::Selected;
            self.info.election_node = Some(req.sender);
            self.info.election_tickets = req.tickets;
            vec![ElectionEffect::Reply(VoteElectionResponse {
                round: self.info.round,
                tickets: req.tickets,
                active_time: self.info.active_time,
                state: VoteState::Agree,
                node_id: req.sender,
            })]
        } else {
            vec![ElectionEffect::Reply(VoteElectionResponse {
                round: self.info.round,
                tickets: self.local_tickets,
                active_time: self.info.active_time,
                state: VoteState::Looking,
                node_id: self.local_id,
            })]
        }
    }

    /// A reply to our candidacy arrived from `from`.
    pub fn handle_response(
        &mut self,
        resp: &VoteElectionResponse,
        from: NodeId,
    ) -> Vec<ElectionEffect> {
        if resp.active_time != self.info.active_time {
            return Vec::new();
        }
        if resp.round > self.info.round {
            // We are behind; catch up and wait for the next exchange.
            self.enter_round(resp.round);
            return Vec::new();
        }
        if resp.round < self.info.round || self.info.state == ElectionState::Selected {
            return Vec::new();
        }

        self.last_activity = self.clock.now();

        match resp.state {
            VoteState::Agree if resp.node_id == self.local_id => {
                self.agrees.insert(from);
                if self.has_majority() {
                    return self.select_self();
                }
                Vec::new()
            }
            VoteState::Looking => {
                // The responder rejected us with its own credential.
                self.note_credential(resp.tickets, resp.node_id);
                if beats(
                    resp.tickets,
                    &resp.node_id,
                    self.local_tickets,
                    &self.local_id,
                ) {
                    self.info.state = ElectionState::Selected;
                    self.info.election_node = Some(resp.node_id);
                    self.info.election_tickets = resp.tickets;
                }
                Vec::new()
            }
            // Agreement on someone else, or a same-round mismatch echo:
            // nothing to do.
            _ => Vec::new(),
        }
    }

    /// The round's authoritative commit arrived.
    ///
    /// Applying the same broadcast twice is a no-op the second time.
    pub fn handle_broadcast(&mut self, bcast: &BroadcastVotedElection) -> Vec<ElectionEffect> {
        if bcast.active_time != self.info.active_time {
            return Vec::new();
        }
        if bcast.round < self.info.round {
            return Vec::new();
        }
        if bcast.round > self.info.round {
            // Fast-forward: accept the greater round and its winner.
            self.enter_round(bcast.round);
        }
        if !self.may_elect(&bcast.winner) {
            tracing::warn!(
                winner = %bcast.winner,
                "ignoring broadcast naming a non-delegator winner"
            );
            return Vec::new();
        }

        self.info.state = ElectionState::Selected;
        self.info.election_node = Some(bcast.winner);
        self.info.election_tickets = bcast.tickets;
        self.decided_effect()
    }

    /// Timer input: if the round has been quiet and no stronger credential
    /// has surfaced, the local node declares itself the winner.
    pub fn on_tick(&mut self) -> Vec<ElectionEffect> {
        if self.info.state != ElectionState::Looking {
            return Vec::new();
        }
        let now = self.clock.now();
        if !self
            .last_activity
            .has_expired(self.quiet_interval_secs, now)
        {
            return Vec::new();
        }
        let local_is_best = !beats(
            self.best_tickets,
            &self.best_node,
            self.local_tickets,
            &self.local_id,
        );
        if local_is_best {
            self.select_self()
        } else {
            Vec::new()
        }
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn enter_round(&mut self, round: u64) {
        self.info = ElectionInfo {
            round,
            state: ElectionState::Looking,
            election_tickets: self.local_tickets,
            active_time: if self.period_active_time == Timestamp::EPOCH {
                self.clock.now()
            } else {
                self.period_active_time
            },
            election_node: None,
        };
        self.agrees.clear();
        self.best_tickets = self.local_tickets;
        self.best_node = self.local_id;
        self.last_activity = self.clock.now();
    }

    fn note_credential(&mut self, tickets: u64, node: NodeId) {
        if beats(tickets, &node, self.best_tickets, &self.best_node) {
            self.best_tickets = tickets;
            self.best_node = node;
        }
    }

    fn has_other_delegators(&self) -> bool {
        let local_hex = self.local_id.to_hex();
        self.delegators.iter().any(|d| *d != local_hex)
    }

    fn may_elect(&self, node: &NodeId) -> bool {
        if !self.delegators_confirmed || self.delegators.is_empty() {
            return true;
        }
        self.delegators.contains(&node.to_hex())
    }

    fn has_majority(&self) -> bool {
        if !self.delegators_confirmed || self.delegators.is_empty() {
            return false;
        }
        // Count the local node's implicit agreement with itself.
        let votes = self.agrees.len() + 1;
        2 * votes > self.delegators.len()
    }

    fn select_self(&mut self) -> Vec<ElectionEffect> {
        if !self.may_elect(&self.local_id) {
            return Vec::new();
        }
        self.info.state = ElectionState::Selected;
        self.info.election_node = Some(self.local_id);
        self.info.election_tickets = self.local_tickets;

        let mut effects = vec![ElectionEffect::Broadcast(BroadcastVotedElection {
            round: self.info.round,
            tickets: self.local_tickets,
            active_time: self.info.active_time,
            state: VoteState::Selected,
            winner: self.local_id,
        })];
        effects.extend(self.decided_effect());
        effects
    }

    fn decided_effect(&mut self) -> Vec<ElectionEffect> {
        let winner = self.info.election_node.expect("decided round has a winner");
        let key = (self.info.round, winner);
        if self.last_decided == Some(key) {
            return Vec::new();
        }
        self.last_decided = Some(key);
        vec![ElectionEffect::Decided {
            round: self.info.round,
            node_id: winner,
        }]
    }
}

/// Whether credential `(a_tickets, a_id)` strictly beats `(b_tickets, b_id)`:
/// tickets first, lexicographic node id as the tiebreak.
fn beats(a_tickets: u64, a_id: &NodeId, b_tickets: u64, b_id: &NodeId) -> bool {
    (a_tickets, a_id) > (b_tickets, b_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    const QUIET_SECS: u64 = 10;

    fn node(b: u8) -> NodeId {
        NodeId::new([b; 32])
    }

    fn manager(id: NodeId, tickets: u64, clock: &Arc<ManualClock>) -> ElectionManager {
        let mut m = ElectionManager::new(id, clock.clone(), QUIET_SECS);
        m.set_local_tickets(tickets);
        m
    }

    fn request_from(m: &ElectionManager, tickets: u64, sender: NodeId) -> VoteElectionRequest {
        VoteElectionRequest {
            round: m.info().round,
            tickets,
            active_time: m.info().active_time,
            sender,
        }
    }

    #[test]
    fn schedule_with_no_peers_wins_trivially() {
        let clock = Arc::new(ManualClock::new(1000));
        let mut m = manager(node(1), 5, &clock);

        let effects = m.schedule_electing();
        assert!(effects
            .iter()
            .any(|e| matches!(e, ElectionEffect::Broadcast(_))));
        assert!(effects
            .iter()
            .any(|e| matches!(e, ElectionEffect::Decided { round: 1, .. })));

        let info = m.info();
        assert_eq!(info.round, 1);
        assert_eq!(info.state, ElectionState::Selected);
        assert_eq!(info.election_node, Some(node(1)));
    }

    #[test]
    fn hundred_rounds_alone_reach_round_hundred() {
        let clock = Arc::new(ManualClock::new(1000));
        let mut m = manager(node(1), 5, &clock);

        for _ in 0..100 {
            let effects = m.schedule_electing();
            assert!(!effects.is_empty());
            assert_eq!(m.info().state, ElectionState::Selected);
            assert_eq!(m.info().election_node, Some(node(1)));
        }
        assert_eq!(m.info().round, 100);
    }

    #[test]
    fn rounds_strictly_increase() {
        let clock = Arc::new(ManualClock::new(1000));
        let mut m = manager(node(1), 5, &clock);
        let mut last = m.info().round;
        for _ in 0..5 {
            m.schedule_electing();
            let round = m.info().round;
            assert!(round > last);
            last = round;
        }
    }

    fn two_delegator_setup(
        clock: &Arc<ManualClock>,
    ) -> (ElectionManager, ElectionManager, NodeId, NodeId) {
        let a = node(0xA0);
        let b = node(0xB0);
        let delegators = vec![a.to_hex(), b.to_hex()];
        let active = Timestamp::new(5000);

        let mut ma = manager(a, 100, clock);
        ma.set_delegators(delegators.clone(), true, active);
        let mut mb = manager(b, 2, clock);
        mb.set_delegators(delegators, true, active);
        (ma, mb, a, b)
    }

    #[test]
    fn lower_ticket_peer_concedes_to_reply() {
        // Scenario: A has 100 tickets, B has 2, both LOOKING at round 1.
        let clock = Arc::new(ManualClock::new(1000));
        let (mut ma, mut mb, a, b) = two_delegator_setup(&clock);

        ma.schedule_electing();
        let proposal = match mb.schedule_electing().pop().unwrap() {
            ElectionEffect::Propose(req) => req,
            other => panic!("expected proposal, got {:?}", other),
        };
        assert_eq!(proposal.tickets, 2);

        // A rejects B's proposal with its own (100, A).
        let effects = ma.handle_request(&proposal);
        let reply = match &effects[..] {
            [ElectionEffect::Reply(resp)] => resp.clone(),
            other => panic!("expected one reply, got {:?}", other),
        };
        assert_eq!(reply.state, VoteState::Looking);
        assert_eq!(reply.tickets, 100);
        assert_eq!(reply.node_id, a);
        assert_eq!(ma.info().state, ElectionState::Looking);

        // B accepts the stronger credential and selects A.
        mb.handle_response(&reply, a);
        assert_eq!(mb.info().state, ElectionState::Selected);
        assert_eq!(mb.info().election_node, Some(a));

        // A goes quiet, wins, broadcasts; both converge on A.
        clock.advance(QUIET_SECS + 1);
        let effects = ma.on_tick();
        let bcast = effects
            .iter()
            .find_map(|e| match e {
                ElectionEffect::Broadcast(b) => Some(b.clone()),
                _ => None,
            })
            .expect("quiet interval should produce a broadcast");
        assert_eq!(bcast.winner, a);

        mb.handle_broadcast(&bcast);
        assert_eq!(ma.info().election_node, Some(a));
        assert_eq!(mb.info().election_node, Some(a));
        let _ = b;
    }

    #[test]
    fn equal_tickets_resolved_lexicographically() {
        // Scenario: three peers, identical tickets, ids A < B < C.
        let clock = Arc::new(ManualClock::new(1000));
        let a = node(0x0A);
        let b = node(0x0B);
        let c = node(0x0C);
        let delegators = vec![a.to_hex(), b.to_hex(), c.to_hex()];
        let active = Timestamp::new(5000);

        let mut managers: Vec<ElectionManager> = [a, b, c]
            .into_iter()
            .map(|id| {
                let mut m = manager(id, 5, &clock);
                m.set_delegators(delegators.clone(), true, active);
                m
            })
            .collect();

        let reqs: Vec<VoteElectionRequest> = managers
            .iter_mut()
            .map(|m| match m.schedule_electing().pop().unwrap() {
                ElectionEffect::Propose(req) => req,
                other => panic!("expected proposal, got {:?}", other),
            })
            .collect();

        // A and B concede to C's request by the id tiebreak.
        for idx in [0, 1] {
            let effects = managers[idx].handle_request(&reqs[2]);
            let reply = match &effects[..] {
                [ElectionEffect::Reply(resp)] => resp.clone(),
                other => panic!("expected one reply, got {:?}", other),
            };
            assert_eq!(reply.state, VoteState::Agree);
            assert_eq!(reply.node_id, c);
            assert_eq!(managers[idx].info().election_node, Some(c));

            // C collects the agreement.
            let from = if idx == 0 { a } else { b };
            managers[2].handle_response(&reply, from);
        }

        // Two agreements plus self is a strict majority of three.
        assert_eq!(managers[2].info().state, ElectionState::Selected);
        assert_eq!(managers[2].info().election_node, Some(c));
    }

    #[test]
    fn stale_round_request_ignored_with_mismatch_reply() {
        let clock = Arc::new(ManualClock::new(1000));
        let (mut ma, _mb, _a, b) = two_delegator_setup(&clock);
        ma.schedule_electing();
        ma.schedule_electing(); // round 2

        let before = ma.info();
        let req = VoteElectionRequest {
            round: before.round - 1,
            tickets: 999,
            active_time: before.active_time,
            sender: b,
        };
        let effects = ma.handle_request(&req);
        let reply = match &effects[..] {
            [ElectionEffect::Reply(resp)] => resp.clone(),
            other => panic!("expected one reply, got {:?}", other),
        };
        assert_eq!(reply.state, VoteState::MismatchedRound);
        assert_eq!(reply.round, before.round);

        let after = ma.info();
        assert_eq!(after.round, before.round);
        assert_eq!(after.state, before.state);
    }

    #[test]
    fn greater_round_request_advances_and_reprocesses() {
        let clock = Arc::new(ManualClock::new(1000));
        let (mut ma, _mb, a, b) = two_delegator_setup(&clock);
        ma.schedule_electing(); // round 1

        let req = VoteElectionRequest {
            round: 3,
            tickets: 1, // weaker than A's 100
            active_time: ma.info().active_time,
            sender: b,
        };
        let effects = ma.handle_request(&req);

        assert_eq!(ma.info().round, 3);
        assert_eq!(ma.info().state, ElectionState::Looking);
        // Re-processed in the new round: rejected with A's credential.
        let reply = match &effects[..] {
            [ElectionEffect::Reply(resp)] => resp.clone(),
            other => panic!("expected one reply, got {:?}", other),
        };
        assert_eq!(reply.state, VoteState::Looking);
        assert_eq!(reply.node_id, a);
    }

    #[test]
    fn selected_round_echoes_current_selection() {
        let clock = Arc::new(ManualClock::new(1000));
        let (mut ma, mut mb, a, b) = two_delegator_setup(&clock);
        ma.schedule_electing();
        let req_b = match mb.schedule_electing().pop().unwrap() {
            ElectionEffect::Propose(req) => req,
            other => panic!("expected proposal, got {:?}", other),
        };

        // B concedes to A via a request carrying A's credential.
        let req_a = request_from(&ma, 100, a);
        mb.handle_request(&req_a);
        assert_eq!(mb.info().state, ElectionState::Selected);

        // Another request now just echoes the selection.
        let effects = mb.handle_request(&req_b);
        let reply = match &effects[..] {
            [ElectionEffect::Reply(resp)] => resp.clone(),
            other => panic!("expected one reply, got {:?}", other),
        };
        assert_eq!(reply.state, VoteState::Agree);
        assert_eq!(reply.node_id, a);
        assert_eq!(mb.info().election_node, Some(a));
        let _ = b;
    }

    #[test]
    fn broadcast_is_idempotent() {
        let clock = Arc::new(ManualClock::new(1000));
        let (mut ma, _mb, _a, b) = two_delegator_setup(&clock);
        ma.schedule_electing();

        let bcast = BroadcastVotedElection {
            round: ma.info().round,
            tickets: 2,
            active_time: ma.info().active_time,
            state: VoteState::Selected,
            winner: b,
        };

        let first = ma.handle_broadcast(&bcast);
        assert!(first
            .iter()
            .any(|e| matches!(e, ElectionEffect::Decided { .. })));
        let info_after_first = ma.info();

        let second = ma.handle_broadcast(&bcast);
        assert!(second.is_empty());
        let info_after_second = ma.info();
        assert_eq!(info_after_first.round, info_after_second.round);
        assert_eq!(
            info_after_first.election_node,
            info_after_second.election_node
        );
    }

    #[test]
    fn broadcast_for_future_round_fast_forwards() {
        let clock = Arc::new(ManualClock::new(1000));
        let (mut ma, _mb, _a, b) = two_delegator_setup(&clock);
        ma.schedule_electing(); // round 1

        let bcast = BroadcastVotedElection {
            round: 4,
            tickets: 2,
            active_time: ma.info().active_time,
            state: VoteState::Selected,
            winner: b,
        };
        ma.handle_broadcast(&bcast);

        assert_eq!(ma.info().round, 4);
        assert_eq!(ma.info().state, ElectionState::Selected);
        assert_eq!(ma.info().election_node, Some(b));
    }

    #[test]
    fn broadcast_from_non_delegator_ignored() {
        let clock = Arc::new(ManualClock::new(1000));
        let (mut ma, _mb, _a, _b) = two_delegator_setup(&clock);
        ma.schedule_electing();

        let outsider = node(0xEE);
        let bcast = BroadcastVotedElection {
            round: ma.info().round,
            tickets: 1_000_000,
            active_time: ma.info().active_time,
            state: VoteState::Selected,
            winner: outsider,
        };
        let effects = ma.handle_broadcast(&bcast);
        assert!(effects.is_empty());
        assert_eq!(ma.info().state, ElectionState::Looking);
    }

    #[test]
    fn mismatched_active_time_dropped() {
        let clock = Arc::new(ManualClock::new(1000));
        let (mut ma, _mb, _a, b) = two_delegator_setup(&clock);
        ma.schedule_electing();

        let req = VoteElectionRequest {
            round: ma.info().round,
            tickets: 999,
            active_time: ma.info().active_time.plus(7),
            sender: b,
        };
        assert!(ma.handle_request(&req).is_empty());
        assert_eq!(ma.info().state, ElectionState::Looking);
    }

    #[test]
    fn quiet_interval_not_elapsed_no_self_win() {
        let clock = Arc::new(ManualClock::new(1000));
        let (mut ma, _mb, _a, _b) = two_delegator_setup(&clock);
        ma.schedule_electing();

        clock.advance(QUIET_SECS - 1);
        assert!(ma.on_tick().is_empty());
        assert_eq!(ma.info().state, ElectionState::Looking);
    }

    #[test]
    fn quiet_interval_with_stronger_peer_seen_no_self_win() {
        let clock = Arc::new(ManualClock::new(1000));
        let (_ma, mut mb, a, _b) = two_delegator_setup(&clock);
        mb.schedule_electing();

        // B saw A's stronger credential via a rejection, then A went silent.
        let resp = VoteElectionResponse {
            round: mb.info().round,
            tickets: 100,
            active_time: mb.info().active_time,
            state: VoteState::MismatchedRound,
            node_id: a,
        };
        // Same-round mismatch echo carries the credential but no agreement.
        mb.handle_response(&resp, a);
        mb.note_credential(100, a);

        clock.advance(QUIET_SECS + 1);
        let effects = mb.on_tick();
        assert!(effects.is_empty());
    }

    #[test]
    fn non_delegator_sits_out_scheduled_rounds() {
        let clock = Arc::new(ManualClock::new(1000));
        let outsider = node(0xEE);
        let mut m = manager(outsider, 50, &clock);
        m.set_delegators(vec![node(1).to_hex(), node(2).to_hex()], true, Timestamp::new(5000));

        let effects = m.schedule_electing();
        assert!(effects.is_empty());
        assert_eq!(m.info().state, ElectionState::Looking);
        assert_eq!(m.info().round, 1);
    }
}
