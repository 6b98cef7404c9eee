//! Node identity derivation.
//!
//! A node's identity is the SHA-256 hash of its Ed25519 public key. Any
//! receiver holding a frame that carries both the sender's public key and
//! its claimed identity can check the binding without a key registry.

use kestrel_types::{NodeId, PublicKey};
use sha2::{Digest, Sha256};

/// Derive the node identifier from a public key.
pub fn node_id_from_public(public: &PublicKey) -> NodeId {
    let digest = Sha256::digest(public.as_bytes());
    NodeId::new(digest.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::keypair_from_seed;

    #[test]
    fn derivation_is_deterministic() {
        let kp = keypair_from_seed(&[1u8; 32]);
        assert_eq!(
            node_id_from_public(&kp.public),
            node_id_from_public(&kp.public)
        );
    }

    #[test]
    fn different_keys_different_ids() {
        let a = keypair_from_seed(&[1u8; 32]);
        let b = keypair_from_seed(&[2u8; 32]);
        assert_ne!(node_id_from_public(&a.public), node_id_from_public(&b.public));
    }
}
