use kestrel_types::{Address, BlockHash};
use thiserror::Error;

/// Errors from block store operations.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("unknown parent {0}")]
    UnknownParent(BlockHash),

    #[error("non-sequential block number: have head {head}, got {got}")]
    NonSequentialNumber { head: u64, got: u64 },

    #[error("block timestamp not after parent")]
    TimestampNotMonotone,

    #[error("block insert failed: {0}")]
    InsertFailed(String),

    #[error("unknown DApp chain {0}")]
    UnknownDapp(Address),
}

/// Failure modes of executing a single transaction against chain state.
///
/// `NonceTooHigh` is the only retryable failure: the transaction may become
/// valid once earlier nonces arrive, so the packager leaves it in the pool.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("nonce too high: account at {current}, tx has {got}")]
    NonceTooHigh { current: u64, got: u64 },

    #[error("nonce too low: account at {current}, tx has {got}")]
    NonceTooLow { current: u64, got: u64 },

    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: u128, available: u128 },
}

impl ExecError {
    /// Whether the transaction may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecError::NonceTooHigh { .. })
    }
}
