//! Minimal ABI encoding for the two ballot-contract methods in use.
//!
//! The general ABI machinery is deliberately absent: this module encodes
//! calls with zero arguments or one dynamic `string`, and decodes the two
//! return shapes the ballot contract produces — `(string)` and
//! `(string, uint256, uint256)`. Selectors are the leading four bytes of
//! the hash of the method signature.

use crate::error::ConsensusError;
use sha2::{Digest, Sha256};

const WORD: usize = 32;

/// Four-byte method selector from a signature like `"delegatorList()"`.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Sha256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Call data for a zero-argument method.
pub fn encode_call(signature: &str) -> Vec<u8> {
    selector(signature).to_vec()
}

/// Call data for a method taking one dynamic `string` argument.
pub fn encode_call_string(signature: &str, arg: &str) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    // head: offset of the dynamic data relative to argument start
    out.extend_from_slice(&uint_word(WORD as u64));
    // tail: length then right-padded bytes
    out.extend_from_slice(&uint_word(arg.len() as u64));
    out.extend_from_slice(arg.as_bytes());
    let pad = (WORD - arg.len() % WORD) % WORD;
    out.extend(std::iter::repeat(0u8).take(pad));
    out
}

/// Decode a return of shape `(string)`.
pub fn decode_string(data: &[u8]) -> Result<String, ConsensusError> {
    let offset = read_uint(data, 0)? as usize;
    read_string(data, offset)
}

/// Decode a return of shape `(string, uint256, uint256)`.
pub fn decode_string_uint_uint(data: &[u8]) -> Result<(String, u64, u64), ConsensusError> {
    let offset = read_uint(data, 0)? as usize;
    let first = read_uint(data, WORD)?;
    let second = read_uint(data, 2 * WORD)?;
    let text = read_string(data, offset)?;
    Ok((text, first, second))
}

fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

fn read_uint(data: &[u8], at: usize) -> Result<u64, ConsensusError> {
    let word = data
        .get(at..at + WORD)
        .ok_or_else(|| malformed("truncated word"))?;
    if word[..WORD - 8].iter().any(|&b| b != 0) {
        return Err(malformed("uint256 exceeds 64 bits"));
    }
    Ok(u64::from_be_bytes(word[WORD - 8..].try_into().expect("8-byte slice")))
}

fn read_string(data: &[u8], at: usize) -> Result<String, ConsensusError> {
    let len = read_uint(data, at)? as usize;
    let bytes = data
        .get(at + WORD..at + WORD + len)
        .ok_or_else(|| malformed("truncated string"))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| malformed("string is not utf-8"))
}

fn malformed(detail: &str) -> ConsensusError {
    ConsensusError::AccessorUnavailable(format!("abi decode: {detail}"))
}

/// Encode a return of shape `(string)` — used by test backends.
pub fn encode_string_return(value: &str) -> Vec<u8> {
    let mut out = uint_word(WORD as u64).to_vec();
    out.extend_from_slice(&uint_word(value.len() as u64));
    out.extend_from_slice(value.as_bytes());
    let pad = (WORD - value.len() % WORD) % WORD;
    out.extend(std::iter::repeat(0u8).take(pad));
    out
}

/// Encode a return of shape `(string, uint256, uint256)` — used by test
/// backends.
pub fn encode_string_uint_uint_return(text: &str, first: u64, second: u64) -> Vec<u8> {
    let mut out = uint_word(3 * WORD as u64).to_vec();
    out.extend_from_slice(&uint_word(first));
    out.extend_from_slice(&uint_word(second));
    out.extend_from_slice(&uint_word(text.len() as u64));
    out.extend_from_slice(text.as_bytes());
    let pad = (WORD - text.len() % WORD) % WORD;
    out.extend(std::iter::repeat(0u8).take(pad));
    out
}
