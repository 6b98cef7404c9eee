//! Block sealing engines.

use crate::block::Block;
use crate::error::ChainError;

/// Seals assembled blocks before insertion.
pub trait Engine: Send + Sync {
    fn seal(&self, block: Block) -> Result<Block, ChainError>;
}

/// Authority-based sealing for a permissioned network: no work, no
/// difficulty. The producer identity in the header is the authority; the
/// seal just stamps the engine marker into the extra data.
pub struct PoaEngine;

const SEAL_MARKER: &[u8] = b"poa-seal-v1";

impl Engine for PoaEngine {
    fn seal(&self, mut block: Block) -> Result<Block, ChainError> {
        block.header.extra = SEAL_MARKER.to_vec();
        Ok(block)
    }
}
