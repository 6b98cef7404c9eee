//! Cryptographic primitives for the Kestrel protocol: Ed25519 key
//! generation, message signing, and node identity derivation.

pub mod keys;
pub mod node_id;
pub mod sign;

pub use keys::{generate_keypair, keypair_from_private, keypair_from_seed};
pub use node_id::node_id_from_public;
pub use sign::{sign_message, verify_signature};
