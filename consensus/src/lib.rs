//! Consensus coordination for a permissioned Kestrel network.
//!
//! Three cooperating pieces, leaves first:
//!
//! - [`ballot`] — reads the on-chain ballot contract and materializes the
//!   ordered candidate list.
//! - [`period`] — derives the delegated producer set for each big period
//!   and synchronizes it across peers.
//! - [`election`] — elects exactly one election node per round among the
//!   confirmed delegators.
//! - [`packager`] — on the elected node, drains the pool and packages
//!   blocks for the main chain and every touched DApp sub-chain.
//! - [`clock`] — injectable time source so the state machines are
//!   deterministic under test.

pub mod abi;
pub mod ballot;
pub mod clock;
pub mod election;
pub mod error;
pub mod packager;
pub mod period;

pub use ballot::{Candidate, ContractAccessor, ContractBackend, DelegatorAccessor};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use election::{ElectionEffect, ElectionInfo, ElectionManager, ElectionState};
pub use error::ConsensusError;
pub use packager::{PackageOutcome, Packager};
pub use period::{BigPeriod, PeriodEffect, PeriodSynchronizer};
