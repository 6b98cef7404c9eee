//! Peer tracking and message fan-out for the Kestrel network layer.

pub mod broadcast;
pub mod error;
pub mod peer_registry;

pub use broadcast::{BroadcastResult, Broadcaster};
pub use error::NetworkError;
pub use peer_registry::{PeerRegistry, PeerState};
