//! Block packaging across the main chain and DApp sub-chains.
//!
//! Runs only on the node the election state machine designated. One
//! invocation drains a pool snapshot, partitions it by target chain, and
//! produces at most one block per touched chain, main chain first and
//! sub-chains in ascending DApp-address order. Chains are independent: a
//! failing insert on one sub-chain is recorded and absorbed while the
//! others commit.

use crate::clock::SharedClock;
use crate::error::ConsensusError;
use kestrel_chain::block::{Header, TxRoot};
use kestrel_chain::{
    Block, BlockChain, BlockTarget, Engine, EventBus, ChainEvent, MultiChainSet, Receipt,
    RemovalReason, Transaction, TxPool,
};
use kestrel_types::NodeId;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// What one packaging run produced.
#[derive(Clone, Debug, Default)]
pub struct PackageOutcome {
    /// Chains that got a new block, in production order.
    pub produced: Vec<BlockTarget>,
    /// Chains whose insert failed, with the failure detail.
    pub failed: Vec<(BlockTarget, String)>,
    /// Transactions dropped because their target DApp has no chain.
    pub unknown_dapp: usize,
    /// True when the head already reached the requested height and the
    /// run was a no-op.
    pub skipped: bool,
}

pub struct Packager {
    engine: Arc<dyn Engine>,
    main_chain: Arc<RwLock<BlockChain>>,
    dapp_chains: MultiChainSet,
    pool: Arc<TxPool>,
    events: EventBus,
    clock: SharedClock,
}

impl Packager {
    pub fn new(
        engine: Arc<dyn Engine>,
        main_chain: Arc<RwLock<BlockChain>>,
        dapp_chains: MultiChainSet,
        pool: Arc<TxPool>,
        events: EventBus,
        clock: SharedClock,
    ) -> Self {
        Self {
            engine,
            main_chain,
            dapp_chains,
            pool,
            events,
            clock,
        }
    }

    /// Package the pooled transactions into new blocks.
    ///
    /// `height` is the expected next main-chain height; if the head is
    /// already there the run returns gracefully without producing
    /// anything. `producer` is stamped into every header.
    pub fn generate_new_block(
        &self,
        height: u64,
        producer: NodeId,
    ) -> Result<PackageOutcome, ConsensusError> {
        let mut outcome = PackageOutcome::default();

        {
            let main = self.main_chain.read().expect("chain lock poisoned");
            if main.height() >= height {
                tracing::debug!(
                    head = main.height(),
                    requested = height,
                    "head already at requested height, skipping"
                );
                outcome.skipped = true;
                return Ok(outcome);
            }
        }

        let snapshot = self.pool.snapshot();

        // Partition by target, preserving submission order within each
        // chain. Unknown DApp targets are dropped from the pool.
        let mut main_txs = Vec::new();
        let mut dapp_txs: BTreeMap<kestrel_types::Address, Vec<Transaction>> = BTreeMap::new();
        for tx in snapshot {
            match tx.target() {
                BlockTarget::Main => main_txs.push(tx),
                BlockTarget::Dapp(addr) => {
                    if self.dapp_chains.contains(&addr) {
                        dapp_txs.entry(addr).or_default().push(tx);
                    } else {
                        tracing::warn!(dapp = %addr, tx = %tx.hash(), "dropping transaction for unknown DApp");
                        self.pool.remove(&tx.hash(), RemovalReason::UnknownDapp);
                        outcome.unknown_dapp += 1;
                    }
                }
            }
        }

        // Main chain first, then touched sub-chains in address order.
        let main_chain = self.main_chain.clone();
        self.package_chain(BlockTarget::Main, &main_chain, main_txs, producer, &mut outcome);
        for (addr, txs) in dapp_txs {
            let chain = self
                .dapp_chains
                .get(&addr)
                .expect("partition only keeps known dapps")
                .clone();
            self.package_chain(BlockTarget::Dapp(addr), &chain, txs, producer, &mut outcome);
        }

        Ok(outcome)
    }

    /// Build, seal, and insert one block on one chain.
    fn package_chain(
        &self,
        target: BlockTarget,
        chain: &Arc<RwLock<BlockChain>>,
        txs: Vec<Transaction>,
        producer: NodeId,
        outcome: &mut PackageOutcome,
    ) {
        let (parent_hash, parent_number, parent_timestamp, mut state) = {
            let chain = chain.read().expect("chain lock poisoned");
            let head = chain.current_block();
            (
                head.hash(),
                head.number(),
                head.header.timestamp,
                chain.state(),
            )
        };

        let number = parent_number + 1;
        // Wall clock, kept monotone with the parent: bump one second on
        // collision.
        let now = self.clock.now();
        let timestamp = if now > parent_timestamp {
            now
        } else {
            parent_timestamp.plus(1)
        };

        // Apply in submission order. Retryable failures stay pooled for
        // the next run; everything else is evicted.
        let mut included = Vec::new();
        let mut receipts = Vec::new();
        for tx in txs {
            match state.apply(&tx) {
                Ok(()) => {
                    receipts.push(Receipt {
                        tx_hash: tx.hash(),
                        block_number: number,
                        success: true,
                    });
                    included.push(tx);
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(tx = %tx.hash(), error = %e, "transaction retained for retry");
                }
                Err(e) => {
                    tracing::debug!(tx = %tx.hash(), error = %e, "transaction failed, evicting");
                    self.pool.remove(&tx.hash(), RemovalReason::ExecutionFailed);
                }
            }
        }

        let header = Header {
            parent_hash,
            number,
            timestamp,
            producer,
            state_root: state.root(),
            tx_root: TxRoot::compute(&included),
            extra: Vec::new(),
        };
        let block = Block {
            header,
            transactions: included,
        };

        let sealed = match self.engine.seal(block) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::error!(chain = %target, error = %e, "sealing failed");
                outcome.failed.push((target, e.to_string()));
                return;
            }
        };

        let insert_result = {
            let mut chain = chain.write().expect("chain lock poisoned");
            chain.insert_block(sealed.clone(), receipts, state)
        };
        match insert_result {
            Ok(()) => {
                for tx in &sealed.transactions {
                    self.pool.remove(&tx.hash(), RemovalReason::Packaged);
                }
                tracing::info!(
                    chain = %target,
                    number = sealed.number(),
                    txs = sealed.transactions.len(),
                    "packaged new block"
                );
                self.events.publish(ChainEvent::NewBlock {
                    chain: target,
                    block: sealed,
                });
                outcome.produced.push(target);
            }
            Err(e) => {
                // Independent chains: record, suppress the event, move on.
                tracing::warn!(chain = %target, error = %e, "block insert failed");
                outcome.failed.push((target, e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use kestrel_chain::{PoaEngine, StateDb};
    use kestrel_types::{Address, BlockHash, Timestamp};

    fn addr(b: u8) -> Address {
        Address::new([b; 20])
    }

    fn genesis(state: &StateDb) -> Block {
        Block {
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
        }
    }

    fn funded_chain(accounts: &[Address]) -> Arc<RwLock<BlockChain>> {
        let mut state = StateDb::new();
        for account in accounts {
            state.alloc(*account, 1_000_000);
        }
        let block = genesis(&state);
        Arc::new(RwLock::new(BlockChain::new(block, state)))
    }

    fn tx(from: Address, nonce: u64, dapp: Option<Address>) -> Transaction {
        Transaction {
            nonce,
            from,
            to: Some(addr(0x99)),
            value: 10,
            payload: Vec::new(),
            dapp,
        }
    }

    struct Fixture {
        packager: Packager,
        pool: Arc<TxPool>,
        main: Arc<RwLock<BlockChain>>,
        d1: Arc<RwLock<BlockChain>>,
        d2: Arc<RwLock<BlockChain>>,
        events: EventBus,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let sender = addr(0x01);
        let main = funded_chain(&[sender]);
        let d1 = funded_chain(&[sender]);
        let d2 = funded_chain(&[sender]);

        let mut chains = BTreeMap::new();
        chains.insert(addr(0xD1), d1.clone());
        chains.insert(addr(0xD2), d2.clone());

        let pool = Arc::new(TxPool::with_default_capacity());
        let events = EventBus::default();
        let clock = Arc::new(ManualClock::new(10_000));
        let packager = Packager::new(
            Arc::new(PoaEngine),
            main.clone(),
            MultiChainSet::new(chains),
            pool.clone(),
            events.clone(),
            clock.clone(),
        );
        Fixture {
            packager,
            pool,
            main,
            d1,
            d2,
            events,
            clock,
        }
    }

    #[test]
    fn partitions_pool_across_chains() {
        // Scenario: pool = [tx_main, tx_d1_a, tx_d2, tx_d1_b]; each
        // touched chain advances by one block with its own transactions.
        let f = fixture();
        let sender = addr(0x01);
        let tx_main = tx(sender, 0, None);
        let tx_d1_a = tx(sender, 0, Some(addr(0xD1)));
        let tx_d2 = tx(sender, 0, Some(addr(0xD2)));
        let tx_d1_b = tx(sender, 1, Some(addr(0xD1)));
        f.pool.add_locals(vec![
            tx_main.clone(),
            tx_d1_a.clone(),
            tx_d2.clone(),
            tx_d1_b.clone(),
        ]);

        let producer = NodeId::new([7u8; 32]);
        let outcome = f.packager.generate_new_block(1, producer).unwrap();

        assert_eq!(
            outcome.produced,
            vec![
                BlockTarget::Main,
                BlockTarget::Dapp(addr(0xD1)),
                BlockTarget::Dapp(addr(0xD2)),
            ]
        );
        assert!(outcome.failed.is_empty());

        let main = f.main.read().unwrap();
        assert_eq!(main.height(), 1);
        assert_eq!(main.current_block().transactions, vec![tx_main]);

        let d1 = f.d1.read().unwrap();
        assert_eq!(d1.height(), 1);
        assert_eq!(d1.current_block().transactions, vec![tx_d1_a, tx_d1_b]);

        let d2 = f.d2.read().unwrap();
        assert_eq!(d2.height(), 1);
        assert_eq!(d2.current_block().transactions, vec![tx_d2]);

        assert!(f.pool.is_empty());
    }

    #[test]
    fn no_transaction_lands_in_two_blocks() {
        let f = fixture();
        let sender = addr(0x01);
        f.pool.add_locals(vec![tx(sender, 0, None), tx(sender, 0, Some(addr(0xD1)))]);

        f.packager
            .generate_new_block(1, NodeId::new([7u8; 32]))
            .unwrap();
        f.clock.advance(10);
        // Second run at the next height: the pool is empty now.
        let outcome = f
            .packager
            .generate_new_block(2, NodeId::new([7u8; 32]))
            .unwrap();

        // An empty follow-up block on main is fine; the transactions must
        // not reappear.
        let main = f.main.read().unwrap();
        let d1 = f.d1.read().unwrap();
        let all_txs: usize = (0..=main.height())
            .map(|n| main.get_block_by_number(n).unwrap().transactions.len())
            .chain((0..=d1.height()).map(|n| d1.get_block_by_number(n).unwrap().transactions.len()))
            .sum();
        assert_eq!(all_txs, 2);
        assert!(!outcome.produced.contains(&BlockTarget::Dapp(addr(0xD1))));
    }

    #[test]
    fn head_at_requested_height_is_noop() {
        let f = fixture();
        f.pool.add_locals(vec![tx(addr(0x01), 0, None)]);

        let outcome = f
            .packager
            .generate_new_block(0, NodeId::new([7u8; 32]))
            .unwrap();
        assert!(outcome.skipped);
        assert!(outcome.produced.is_empty());
        assert_eq!(f.main.read().unwrap().height(), 0);
        // Pool untouched.
        assert_eq!(f.pool.len(), 1);
    }

    #[test]
    fn unknown_dapp_transactions_dropped() {
        let f = fixture();
        let sender = addr(0x01);
        f.pool.add_locals(vec![
            tx(sender, 0, Some(addr(0xEE))), // no such chain
            tx(sender, 0, None),
        ]);

        let outcome = f
            .packager
            .generate_new_block(1, NodeId::new([7u8; 32]))
            .unwrap();

        assert_eq!(outcome.unknown_dapp, 1);
        assert_eq!(outcome.produced, vec![BlockTarget::Main]);
        assert!(f.pool.is_empty());
    }

    #[test]
    fn nonce_too_high_retained_for_retry() {
        let f = fixture();
        let sender = addr(0x01);
        let gapped = tx(sender, 5, None);
        f.pool.add_locals(vec![tx(sender, 0, None), gapped.clone()]);

        f.packager
            .generate_new_block(1, NodeId::new([7u8; 32]))
            .unwrap();

        // The in-order transaction was packaged; the gapped one stays.
        assert_eq!(f.pool.len(), 1);
        assert!(f.pool.contains(&gapped.hash()));
        let main = f.main.read().unwrap();
        assert_eq!(main.current_block().transactions.len(), 1);
    }

    #[test]
    fn non_retryable_failure_evicts() {
        let f = fixture();
        let broke = addr(0x0F); // no balance
        let doomed = Transaction {
            nonce: 0,
            from: broke,
            to: Some(addr(0x99)),
            value: 1_000,
            payload: Vec::new(),
            dapp: None,
        };
        f.pool.add_locals(vec![doomed.clone()]);

        f.packager
            .generate_new_block(1, NodeId::new([7u8; 32]))
            .unwrap();

        assert!(!f.pool.contains(&doomed.hash()));
        // Block still produced, just empty.
        assert_eq!(f.main.read().unwrap().height(), 1);
    }

    #[test]
    fn timestamp_bumps_on_collision() {
        let f = fixture();
        f.pool.add_locals(vec![tx(addr(0x01), 0, None)]);
        f.packager
            .generate_new_block(1, NodeId::new([7u8; 32]))
            .unwrap();
        let first_ts = f.main.read().unwrap().current_block().header.timestamp;
        assert_eq!(first_ts.as_secs(), 10_000);

        // Clock does not advance: the next block bumps by one second.
        f.pool.add_locals(vec![tx(addr(0x01), 1, None)]);
        f.packager
            .generate_new_block(2, NodeId::new([7u8; 32]))
            .unwrap();
        let second_ts = f.main.read().unwrap().current_block().header.timestamp;
        assert_eq!(second_ts.as_secs(), 10_001);
    }

    #[tokio::test]
    async fn new_block_event_per_chain() {
        let f = fixture();
        let mut rx = f.events.subscribe();
        let sender = addr(0x01);
        f.pool.add_locals(vec![
            tx(sender, 0, None),
            tx(sender, 0, Some(addr(0xD1))),
        ]);

        f.packager
            .generate_new_block(1, NodeId::new([7u8; 32]))
            .unwrap();

        let mut chains = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                ChainEvent::NewBlock { chain, .. } => chains.push(chain),
                other => panic!("expected NewBlock, got {:?}", other),
            }
        }
        assert_eq!(
            chains,
            vec![BlockTarget::Main, BlockTarget::Dapp(addr(0xD1))]
        );
    }

    #[test]
    fn producer_stamped_into_headers() {
        let f = fixture();
        f.pool.add_locals(vec![tx(addr(0x01), 0, None)]);
        let producer = NodeId::new([0xAB; 32]);

        f.packager.generate_new_block(1, producer).unwrap();
        assert_eq!(
            f.main.read().unwrap().current_block().header.producer,
            producer
        );
    }
}
