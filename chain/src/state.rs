//! Account state database.
//!
//! A minimal nonce/balance account model. The packager clones a snapshot,
//! applies transactions against the clone, and commits the result with the
//! sealed block, so the canonical state is only ever replaced wholesale.

use crate::error::ExecError;
use crate::transaction::Transaction;
use kestrel_types::{Address, BlockHash};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Per-account state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: u128,
}

/// In-memory account state, keyed by address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDb {
    accounts: BTreeMap<Address, AccountState>,
}

impl StateDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account with a balance (genesis allocation).
    pub fn alloc(&mut self, address: Address, balance: u128) {
        self.accounts.insert(
            address,
            AccountState { nonce: 0, balance },
        );
    }

    pub fn account(&self, address: &Address) -> AccountState {
        self.accounts.get(address).cloned().unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> u128 {
        self.account(address).balance
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.account(address).nonce
    }

    /// Apply one transaction, mutating this state on success.
    ///
    /// On failure the state is left untouched and the caller decides whether
    /// the transaction is retryable (see [`ExecError::is_retryable`]).
    pub fn apply(&mut self, tx: &Transaction) -> Result<(), ExecError> {
        let sender = self.account(&tx.from);

        if tx.nonce > sender.nonce {
            return Err(ExecError::NonceTooHigh {
                current: sender.nonce,
                got: tx.nonce,
            });
        }
        if tx.nonce < sender.nonce {
            return Err(ExecError::NonceTooLow {
                current: sender.nonce,
                got: tx.nonce,
            });
        }
        if tx.value > sender.balance {
            return Err(ExecError::InsufficientBalance {
                needed: tx.value,
                available: sender.balance,
            });
        }

        let entry = self.accounts.entry(tx.from).or_default();
        entry.nonce += 1;
        entry.balance -= tx.value;

        if let Some(to) = tx.to {
            let recipient = self.accounts.entry(to).or_default();
            recipient.balance += tx.value;
        }
        Ok(())
    }

    /// Deterministic commitment over the full account set.
    pub fn root(&self) -> BlockHash {
        let mut hasher = Sha256::new();
        for (address, account) in &self.accounts {
            hasher.update(address.as_bytes());
            hasher.update(account.nonce.to_be_bytes());
            hasher.update(account.balance.to_be_bytes());
        }
        BlockHash::new(hasher.finalize().into())
    }

    /// Serialized snapshot blob, served to peers as node data.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.accounts.len() as u64).to_be_bytes());
        for (address, account) in &self.accounts {
            out.extend_from_slice(address.as_bytes());
            out.extend_from_slice(&account.nonce.to_be_bytes());
            out.extend_from_slice(&account.balance.to_be_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::new([b; 20])
    }

    fn tx(from: Address, to: Address, nonce: u64, value: u128) -> Transaction {
        Transaction {
            nonce,
            from,
            to: Some(to),
            value,
            payload: Vec::new(),
            dapp: None,
        }
    }

    #[test]
    fn transfer_moves_balance_and_bumps_nonce() {
        let mut state = StateDb::new();
        state.alloc(addr(1), 1000);

        state.apply(&tx(addr(1), addr(2), 0, 300)).unwrap();

        assert_eq!(state.balance(&addr(1)), 700);
        assert_eq!(state.balance(&addr(2)), 300);
        assert_eq!(state.nonce(&addr(1)), 1);
    }

    #[test]
    fn nonce_too_high_is_retryable() {
        let mut state = StateDb::new();
        state.alloc(addr(1), 1000);

        let err = state.apply(&tx(addr(1), addr(2), 5, 1)).unwrap_err();
        assert!(matches!(err, ExecError::NonceTooHigh { current: 0, got: 5 }));
        assert!(err.is_retryable());
        // State untouched.
        assert_eq!(state.balance(&addr(1)), 1000);
    }

    #[test]
    fn nonce_too_low_is_not_retryable() {
        let mut state = StateDb::new();
        state.alloc(addr(1), 1000);
        state.apply(&tx(addr(1), addr(2), 0, 1)).unwrap();

        let err = state.apply(&tx(addr(1), addr(2), 0, 1)).unwrap_err();
        assert!(matches!(err, ExecError::NonceTooLow { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn insufficient_balance_rejected() {
        let mut state = StateDb::new();
        state.alloc(addr(1), 10);

        let err = state.apply(&tx(addr(1), addr(2), 0, 11)).unwrap_err();
        assert!(matches!(err, ExecError::InsufficientBalance { .. }));
    }

    #[test]
    fn root_changes_with_state() {
        let mut state = StateDb::new();
        let before = state.root();
        state.alloc(addr(1), 1000);
        assert_ne!(state.root(), before);
    }
}
