//! In-memory block chain store with head tracking.

use crate::block::Block;
use crate::error::ChainError;
use crate::state::StateDb;
use kestrel_types::{BlockHash, TxHash};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Execution receipt for one packaged transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
}

/// One chain: the main chain or a single DApp sub-chain.
///
/// Single-writer by contract: on the producing node only the packager
/// inserts, elsewhere only the sync downloader does. Readers see a
/// consistent head because inserts replace head, state, and indexes
/// together.
pub struct BlockChain {
    blocks_by_hash: HashMap<BlockHash, Block>,
    hash_by_number: Vec<BlockHash>,
    receipts: HashMap<BlockHash, Vec<Receipt>>,
    /// Serialized state snapshots keyed by state root, served as node data.
    node_data: HashMap<BlockHash, Vec<u8>>,
    state: StateDb,
}

impl BlockChain {
    /// Create a chain from its genesis block and genesis state.
    pub fn new(genesis: Block, genesis_state: StateDb) -> Self {
        let genesis_hash = genesis.hash();
        let mut blocks_by_hash = HashMap::new();
        blocks_by_hash.insert(genesis_hash, genesis);

        let mut node_data = HashMap::new();
        node_data.insert(genesis_state.root(), genesis_state.encode());

        Self {
            blocks_by_hash,
            hash_by_number: vec![genesis_hash],
            receipts: HashMap::new(),
            node_data,
            state: genesis_state,
        }
    }

    pub fn genesis(&self) -> &Block {
        &self.blocks_by_hash[&self.hash_by_number[0]]
    }

    pub fn current_block(&self) -> &Block {
        &self.blocks_by_hash[self.hash_by_number.last().expect("genesis always present")]
    }

    pub fn height(&self) -> u64 {
        self.current_block().number()
    }

    pub fn get_block_by_number(&self, number: u64) -> Option<&Block> {
        self.hash_by_number
            .get(number as usize)
            .map(|h| &self.blocks_by_hash[h])
    }

    pub fn get_block_by_hash(&self, hash: &BlockHash) -> Option<&Block> {
        self.blocks_by_hash.get(hash)
    }

    /// Up to `max` block hashes walking parent links from `from` (inclusive).
    pub fn get_block_hashes_from_hash(&self, from: &BlockHash, max: usize) -> Vec<BlockHash> {
        let mut hashes = Vec::new();
        let mut cursor = *from;
        while hashes.len() < max {
            let Some(block) = self.blocks_by_hash.get(&cursor) else {
                break;
            };
            hashes.push(cursor);
            if block.number() == 0 {
                break;
            }
            cursor = block.header.parent_hash;
        }
        hashes
    }

    pub fn receipts_by_hash(&self, hash: &BlockHash) -> Option<&Vec<Receipt>> {
        self.receipts.get(hash)
    }

    /// Serialized state snapshot for a state root, if held.
    pub fn node_data(&self, hash: &BlockHash) -> Option<&Vec<u8>> {
        self.node_data.get(hash)
    }

    /// Snapshot of the head state.
    pub fn state(&self) -> StateDb {
        self.state.clone()
    }

    /// Append a sealed block together with its receipts and post state.
    ///
    /// The block must extend the current head with the next number and a
    /// timestamp strictly after the parent's.
    pub fn insert_block(
        &mut self,
        block: Block,
        receipts: Vec<Receipt>,
        post_state: StateDb,
    ) -> Result<(), ChainError> {
        let head = self.current_block();
        if block.header.parent_hash != head.hash() {
            return Err(ChainError::UnknownParent(block.header.parent_hash));
        }
        if block.number() != head.number() + 1 {
            return Err(ChainError::NonSequentialNumber {
                head: head.number(),
                got: block.number(),
            });
        }
        if block.header.timestamp <= head.header.timestamp {
            return Err(ChainError::TimestampNotMonotone);
        }

        let hash = block.hash();
        self.node_data.insert(post_state.root(), post_state.encode());
        self.state = post_state;
        self.receipts.insert(hash, receipts);
        self.hash_by_number.push(hash);
        self.blocks_by_hash.insert(hash, block);
        Ok(())
    }
}
