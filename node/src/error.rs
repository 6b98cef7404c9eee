use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("chain error: {0}")]
    Chain(#[from] kestrel_chain::ChainError),

    #[error("consensus error: {0}")]
    Consensus(#[from] kestrel_consensus::ConsensusError),

    #[error("protocol error: {0}")]
    Protocol(#[from] kestrel_protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown timeout")]
    ShutdownTimeout,

    #[error("{0}")]
    Other(String),
}
