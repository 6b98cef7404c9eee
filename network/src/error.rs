use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("unknown peer {0}")]
    UnknownPeer(String),

    #[error("outbound queue full")]
    QueueFull,
}
