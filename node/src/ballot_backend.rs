//! Contract backends for the ballot accessor.
//!
//! A full deployment binds the accessor to the chain's contract VM. The
//! node ships two stand-ins: a registry provisioned from the config file
//! (answering the two ballot methods with ABI-encoded data), and a null
//! backend that reports the accessor unavailable so the synchronizer
//! simply retries on the next tick.

use kestrel_consensus::{abi, ConsensusError, ContractBackend};
use kestrel_types::Address;

use crate::config::DelegatorEntry;

const DELEGATOR_LIST: &str = "delegatorList()";
const DELEGATOR_INFO: &str = "delegatorInfo(string)";

/// Serves the ballot methods from a statically provisioned registry.
pub struct ConfiguredBallot {
    entries: Vec<DelegatorEntry>,
}

impl ConfiguredBallot {
    pub fn new(entries: Vec<DelegatorEntry>) -> Self {
        Self { entries }
    }
}

impl ContractBackend for ConfiguredBallot {
    fn call(&self, _to: Address, input: &[u8]) -> Result<Vec<u8>, ConsensusError> {
        let selector = input
            .get(..4)
            .ok_or_else(|| ConsensusError::AccessorUnavailable("empty call data".into()))?;

        if selector == abi::selector(DELEGATOR_LIST) {
            let list = self
                .entries
                .iter()
                .map(|e| e.node_id.as_str())
                .collect::<Vec<_>>()
                .join(",");
            return Ok(abi::encode_string_return(&list));
        }

        if selector == abi::selector(DELEGATOR_INFO) {
            let id = decode_string_arg(input)?;
            let entry = self
                .entries
                .iter()
                .find(|e| e.node_id == id)
                .ok_or_else(|| {
                    ConsensusError::AccessorUnavailable(format!("unknown delegator {id}"))
                })?;
            return Ok(abi::encode_string_uint_uint_return(
                &entry.ip,
                entry.port as u64,
                entry.ticket,
            ));
        }

        Err(ConsensusError::AccessorUnavailable(
            "unknown ballot method".into(),
        ))
    }
}

/// Backend for nodes without a provisioned registry: every call reports
/// the accessor unavailable.
pub struct NullBallot;

impl ContractBackend for NullBallot {
    fn call(&self, _to: Address, _input: &[u8]) -> Result<Vec<u8>, ConsensusError> {
        Err(ConsensusError::AccessorUnavailable(
            "no ballot registry provisioned".into(),
        ))
    }
}

/// Extract the single dynamic string argument from call data.
fn decode_string_arg(input: &[u8]) -> Result<String, ConsensusError> {
    let malformed =
        |detail: &str| ConsensusError::AccessorUnavailable(format!("call data: {detail}"));
    // selector || offset word || length word || padded bytes
    let len_word = input.get(4 + 32..4 + 64).ok_or_else(|| malformed("truncated"))?;
    if len_word[..24].iter().any(|&b| b != 0) {
        return Err(malformed("oversized length"));
    }
    let len = u64::from_be_bytes(len_word[24..].try_into().expect("8-byte slice")) as usize;
    let bytes = input
        .get(4 + 64..4 + 64 + len)
        .ok_or_else(|| malformed("truncated string"))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| malformed("not utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus::{ContractAccessor, DelegatorAccessor};
    use std::sync::Arc;

    fn entries() -> Vec<DelegatorEntry> {
        vec![
            DelegatorEntry {
                node_id: "beef".into(),
                ip: "10.0.0.2".into(),
                port: 30311,
                ticket: 4,
            },
            DelegatorEntry {
                node_id: "abcd".into(),
                ip: "10.0.0.1".into(),
                port: 30310,
                ticket: 9,
            },
        ]
    }

    #[test]
    fn accessor_refreshes_from_configured_registry() {
        let accessor = ContractAccessor::new(
            Arc::new(ConfiguredBallot::new(entries())),
            Address::new([0x42; 20]),
        );
        let candidates = accessor.refresh().unwrap();

        assert_eq!(candidates.len(), 2);
        // Canonical ordering by node id.
        assert_eq!(candidates[0].node_id, "abcd");
        assert_eq!(candidates[0].ticket, 9);
        assert_eq!(candidates[1].node_id, "beef");
        assert_eq!(candidates[1].port, 30311);
    }

    #[test]
    fn null_backend_is_unavailable() {
        let accessor = ContractAccessor::new(Arc::new(NullBallot), Address::new([0x42; 20]));
        assert!(matches!(
            accessor.refresh(),
            Err(ConsensusError::AccessorUnavailable(_))
        ));
    }
}
