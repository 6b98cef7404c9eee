//! Shared transaction pool.
//!
//! The pool serializes its own mutations behind an internal lock and hands
//! out whole-batch snapshots, so a packaging run observes a frozen view
//! regardless of concurrent submissions.

use crate::transaction::Transaction;
use kestrel_types::TxHash;
use std::collections::HashSet;
use std::sync::Mutex;

/// Why a transaction left the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalReason {
    /// Included in a block.
    Packaged,
    /// Failed execution with a non-retryable error.
    ExecutionFailed,
    /// Targeted a DApp address with no chain in the multi-chain set.
    UnknownDapp,
}

struct PoolInner {
    pending: Vec<Transaction>,
    known: HashSet<TxHash>,
}

/// Shared transaction pool with atomic batch snapshots.
pub struct TxPool {
    inner: Mutex<PoolInner>,
    capacity: usize,
}

/// Default pending-transaction capacity.
const DEFAULT_CAPACITY: usize = 4096;

impl TxPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                pending: Vec::new(),
                known: HashSet::new(),
            }),
            capacity,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Add locally submitted transactions, preserving submission order.
    ///
    /// Duplicates (by hash) and overflow beyond capacity are dropped;
    /// returns the number actually admitted.
    pub fn add_locals(&self, txs: Vec<Transaction>) -> usize {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        let mut added = 0;
        for tx in txs {
            if inner.pending.len() >= self.capacity {
                break;
            }
            let hash = tx.hash();
            if inner.known.insert(hash) {
                inner.pending.push(tx);
                added += 1;
            }
        }
        added
    }

    /// Atomic batch snapshot of pending transactions in submission order.
    pub fn snapshot(&self) -> Vec<Transaction> {
        let inner = self.inner.lock().expect("pool lock poisoned");
        inner.pending.clone()
    }

    /// Remove one transaction for the given reason.
    pub fn remove(&self, hash: &TxHash, reason: RemovalReason) {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        if inner.known.remove(hash) {
            inner.pending.retain(|tx| tx.hash() != *hash);
            tracing::trace!(%hash, ?reason, "transaction removed from pool");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pool lock poisoned").pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.inner
            .lock()
            .expect("pool lock poisoned")
            .known
            .contains(hash)
    }
}
