//! Block and header types.

use crate::transaction::Transaction;
use kestrel_types::{BlockHash, NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A block header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: BlockHash,
    pub number: u64,
    pub timestamp: Timestamp,
    /// The node that packaged this block.
    pub producer: NodeId,
    /// Root of the post-execution state.
    pub state_root: BlockHash,
    /// Commitment to the block's transaction list.
    pub tx_root: TxRoot,
    /// Engine-specific seal data.
    pub extra: Vec<u8>,
}

/// Commitment to an ordered transaction list (hash over the tx hashes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRoot(pub [u8; 32]);

impl TxRoot {
    pub const EMPTY: Self = Self([0u8; 32]);

    pub fn compute(transactions: &[Transaction]) -> Self {
        if transactions.is_empty() {
            return Self::EMPTY;
        }
        let mut hasher = Sha256::new();
        for tx in transactions {
            hasher.update(tx.hash().as_bytes());
        }
        Self(hasher.finalize().into())
    }
}

impl Header {
    /// The header hash, which is also the block hash.
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(self.parent_hash.as_bytes());
        hasher.update(self.number.to_be_bytes());
        hasher.update(self.timestamp.as_secs().to_be_bytes());
        hasher.update(self.producer.as_bytes());
        hasher.update(self.state_root.as_bytes());
        hasher.update(self.tx_root.0);
        hasher.update((self.extra.len() as u64).to_be_bytes());
        hasher.update(&self.extra);
        BlockHash::new(hasher.finalize().into())
    }
}

/// A sealed block: header plus the transactions it packaged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }
}
