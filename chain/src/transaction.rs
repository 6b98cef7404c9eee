//! Transactions and their routing target.

use kestrel_types::{Address, TxHash};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Where a transaction belongs: the main chain, or one DApp sub-chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BlockTarget {
    Main,
    Dapp(Address),
}

impl std::fmt::Display for BlockTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockTarget::Main => write!(f, "main"),
            BlockTarget::Dapp(addr) => write!(f, "dapp:{addr}"),
        }
    }
}

/// An account-model transaction.
///
/// A transaction carrying a `dapp` address belongs to that DApp's isolated
/// sub-chain; without one it is a main-chain transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub value: u128,
    pub payload: Vec<u8>,
    /// Target DApp sub-chain, if any.
    pub dapp: Option<Address>,
}

impl Transaction {
    /// The chain this transaction is routed to.
    pub fn target(&self) -> BlockTarget {
        match self.dapp {
            Some(addr) => BlockTarget::Dapp(addr),
            None => BlockTarget::Main,
        }
    }

    /// Content hash over all fields.
    pub fn hash(&self) -> TxHash {
        let mut hasher = Sha256::new();
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.from.as_bytes());
        match &self.to {
            Some(to) => {
                hasher.update([1u8]);
                hasher.update(to.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(self.value.to_be_bytes());
        hasher.update((self.payload.len() as u64).to_be_bytes());
        hasher.update(&self.payload);
        match &self.dapp {
            Some(dapp) => {
                hasher.update([1u8]);
                hasher.update(dapp.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        TxHash::new(hasher.finalize().into())
    }
}
