//! Ballot accessor — materializes candidate records from the on-chain
//! voting contract.

use crate::abi;
use crate::error::ConsensusError;
use kestrel_types::Address;
use std::sync::Arc;

/// A delegator candidate decoded from ballot contract state.
///
/// Candidate lists are rebuilt wholesale on every refresh and never mutated
/// in place. Ties between candidates are broken by lexicographic `node_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub node_id: String,
    pub ip: String,
    pub port: u16,
    pub ticket: u64,
}

/// Source of the delegator candidate list.
pub trait DelegatorAccessor: Send + Sync {
    /// Re-derive the full candidate list from chain state.
    ///
    /// The returned list is in canonical order (lexicographic by
    /// `node_id`); this is the order the period signature covers. Any
    /// failure — transport, decoding, or an empty registry — surfaces as
    /// [`ConsensusError::AccessorUnavailable`], and callers keep their
    /// current period.
    fn refresh(&self) -> Result<Vec<Candidate>, ConsensusError>;
}

/// Read-only contract call surface bound to current main-chain state.
pub trait ContractBackend: Send + Sync {
    fn call(&self, to: Address, input: &[u8]) -> Result<Vec<u8>, ConsensusError>;
}

/// Accessor backed by the ballot contract at a well-known address.
pub struct ContractAccessor {
    backend: Arc<dyn ContractBackend>,
    ballot_address: Address,
}

const DELEGATOR_LIST: &str = "delegatorList()";
const DELEGATOR_INFO: &str = "delegatorInfo(string)";

impl ContractAccessor {
    pub fn new(backend: Arc<dyn ContractBackend>, ballot_address: Address) -> Self {
        Self {
            backend,
            ballot_address,
        }
    }
}

impl DelegatorAccessor for ContractAccessor {
    fn refresh(&self) -> Result<Vec<Candidate>, ConsensusError> {
        let raw = self
            .backend
            .call(self.ballot_address, &abi::encode_call(DELEGATOR_LIST))?;
        let list = abi::decode_string(&raw)?;

        let ids: Vec<&str> = list.split(',').filter(|s| !s.is_empty()).collect();
        if ids.is_empty() {
            return Err(ConsensusError::AccessorUnavailable(
                "ballot contract returned no delegators".into(),
            ));
        }

        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            let raw = self.backend.call(
                self.ballot_address,
                &abi::encode_call_string(DELEGATOR_INFO, id),
            )?;
            let (ip, port, ticket) = abi::decode_string_uint_uint(&raw)?;
            let port = u16::try_from(port).map_err(|_| {
                ConsensusError::AccessorUnavailable(format!("port out of range for {id}"))
            })?;
            candidates.push(Candidate {
                node_id: id.to_string(),
                ip,
                port,
                ticket,
            });
        }

        candidates.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(candidates)
    }
}
