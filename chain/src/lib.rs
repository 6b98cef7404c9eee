//! Blockchain primitives consumed by the consensus-coordination core.
//!
//! Everything here behaves as in widely-documented account-model chains:
//! an in-memory block store with head tracking, a nonce/balance state
//! database, a shared transaction pool with atomic batch snapshots, a
//! sealing engine, the per-DApp sub-chain set, and the node-wide event bus.

pub mod block;
pub mod chain;
pub mod engine;
pub mod error;
pub mod event;
pub mod multichain;
pub mod pool;
pub mod state;
pub mod transaction;

pub use block::{Block, Header};
pub use chain::{BlockChain, Receipt};
pub use engine::{Engine, PoaEngine};
pub use error::{ChainError, ExecError};
pub use event::{ChainEvent, EventBus};
pub use multichain::MultiChainSet;
pub use pool::{RemovalReason, TxPool};
pub use state::{AccountState, StateDb};
pub use transaction::{BlockTarget, Transaction};
