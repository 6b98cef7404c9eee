use thiserror::Error;

/// Consensus-layer errors.
///
/// The recoverable kinds (`AccessorUnavailable`, `InsertFailed`) are logged
/// and absorbed at their call sites; `ProtocolViolation` propagates to the
/// peer session, which disconnects.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("ballot accessor unavailable: {0}")]
    AccessorUnavailable(String),

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("block insert failed: {0}")]
    InsertFailed(String),

    #[error("chain error: {0}")]
    Chain(#[from] kestrel_chain::ChainError),
}
