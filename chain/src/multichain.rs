//! The per-DApp sub-chain set.

use crate::chain::BlockChain;
use kestrel_types::Address;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Maps each DApp address to its independent sub-chain.
///
/// The mapping is fixed at construction; there is no dynamic DApp chain
/// creation. Iteration order is ascending by address, which is what makes
/// multi-chain packaging deterministic.
#[derive(Clone, Default)]
pub struct MultiChainSet {
    chains: BTreeMap<Address, Arc<RwLock<BlockChain>>>,
}

impl MultiChainSet {
    pub fn new(chains: BTreeMap<Address, Arc<RwLock<BlockChain>>>) -> Self {
        Self { chains }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, dapp: &Address) -> Option<&Arc<RwLock<BlockChain>>> {
        self.chains.get(dapp)
    }

    pub fn contains(&self, dapp: &Address) -> bool {
        self.chains.contains_key(dapp)
    }

    /// Sub-chains in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Arc<RwLock<BlockChain>>)> {
        self.chains.iter()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Header, TxRoot};
    use crate::state::StateDb;
    use kestrel_types::{BlockHash, NodeId, Timestamp};

    fn empty_chain() -> Arc<RwLock<BlockChain>> {
        let genesis = Block {
            header: Header {
                parent_hash: BlockHash::ZERO,
                number: 0,
                timestamp: Timestamp::EPOCH,
                producer: NodeId::ZERO,
                state_root: StateDb::new().root(),
                tx_root: TxRoot::EMPTY,
                extra: Vec::new(),
            },
            transactions: Vec::new(),
        };
        Arc::new(RwLock::new(BlockChain::new(genesis, StateDb::new())))
    }

    #[test]
    fn iteration_is_address_ordered() {
        let mut chains = BTreeMap::new();
        chains.insert(Address::new([9u8; 20]), empty_chain());
        chains.insert(Address::new([1u8; 20]), empty_chain());
        chains.insert(Address::new([5u8; 20]), empty_chain());
        let set = MultiChainSet::new(chains);

        let order: Vec<Address> = set.iter().map(|(a, _)| *a).collect();
        assert_eq!(
            order,
            vec![
                Address::new([1u8; 20]),
                Address::new([5u8; 20]),
                Address::new([9u8; 20])
            ]
        );
    }

    #[test]
    fn unknown_dapp_not_contained() {
        let set = MultiChainSet::empty();
        assert!(!set.contains(&Address::new([1u8; 20])));
    }
}
