//! Fundamental types for the Kestrel protocol.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: hashes, node and DApp identifiers, keys, signatures, and
//! timestamps.

pub mod error;
pub mod hash;
pub mod identity;
pub mod keys;
pub mod time;

pub use error::TypeError;
pub use hash::{BlockHash, TxHash};
pub use identity::{Address, NodeId};
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature};
pub use time::Timestamp;
