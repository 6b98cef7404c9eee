//! Canonical wire encoding.
//!
//! Payloads are recursive structures of byte strings and lists, encoded
//! with explicit length prefixes:
//!
//! ```text
//! bytes: 0x00 || len (u32 BE) || raw bytes
//! list:  0x01 || count (u32 BE) || items
//! ```
//!
//! Integers ride inside byte strings as minimal big-endian values: no
//! leading zero bytes, zero encoded as the empty string. Decoding is
//! strict — non-canonical integers, trailing bytes, and over-deep nesting
//! are rejected, so a payload has exactly one valid encoding.

use crate::error::ProtocolError;

/// Maximum nesting depth accepted by the decoder.
const MAX_DEPTH: usize = 32;

/// One node of a wire payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    Bytes(Vec<u8>),
    List(Vec<Item>),
}

impl Item {
    /// A byte-string item holding a canonical unsigned integer.
    pub fn uint(value: u64) -> Self {
        Item::Bytes(encode_uint(value))
    }

    /// A byte-string item holding a canonical 128-bit unsigned integer.
    pub fn uint128(value: u128) -> Self {
        let bytes = value.to_be_bytes();
        let first = bytes.iter().position(|&b| b != 0).unwrap_or(16);
        Item::Bytes(bytes[first..].to_vec())
    }

    /// A byte-string item from UTF-8 text.
    pub fn string(value: &str) -> Self {
        Item::Bytes(value.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> Result<&[u8], ProtocolError> {
        match self {
            Item::Bytes(b) => Ok(b),
            Item::List(_) => Err(ProtocolError::UnexpectedItem("byte string")),
        }
    }

    pub fn as_list(&self) -> Result<&[Item], ProtocolError> {
        match self {
            Item::List(items) => Ok(items),
            Item::Bytes(_) => Err(ProtocolError::UnexpectedItem("list")),
        }
    }

    /// Decode a canonical unsigned 64-bit integer.
    pub fn as_u64(&self) -> Result<u64, ProtocolError> {
        let bytes = self.as_bytes()?;
        decode_uint(bytes, 8).map(|v| v as u64)
    }

    /// Decode a canonical unsigned 128-bit integer.
    pub fn as_u128(&self) -> Result<u128, ProtocolError> {
        decode_uint(self.as_bytes()?, 16)
    }

    /// Decode a boolean (canonical 0 or 1).
    pub fn as_bool(&self) -> Result<bool, ProtocolError> {
        match self.as_u64()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ProtocolError::Malformed("boolean out of range".into())),
        }
    }

    /// Decode UTF-8 text.
    pub fn as_string(&self) -> Result<String, ProtocolError> {
        String::from_utf8(self.as_bytes()?.to_vec())
            .map_err(|_| ProtocolError::Malformed("invalid utf-8".into()))
    }

    /// Decode a fixed-width byte array.
    pub fn as_array<const N: usize>(&self) -> Result<[u8; N], ProtocolError> {
        self.as_bytes()?
            .try_into()
            .map_err(|_| ProtocolError::Malformed(format!("expected {N} bytes")))
    }
}

/// Minimal big-endian encoding of an unsigned integer.
fn encode_uint(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(8);
    bytes[first..].to_vec()
}

/// Strict canonical integer decode: no leading zeros, bounded width.
fn decode_uint(bytes: &[u8], max_width: usize) -> Result<u128, ProtocolError> {
    if bytes.len() > max_width {
        return Err(ProtocolError::IntegerTooWide(max_width));
    }
    if bytes.first() == Some(&0) {
        return Err(ProtocolError::NonCanonicalInteger);
    }
    let mut value: u128 = 0;
    for &b in bytes {
        value = (value << 8) | b as u128;
    }
    Ok(value)
}

/// Encode one item to bytes.
pub fn encode(item: &Item) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(item, &mut out);
    out
}

fn encode_into(item: &Item, out: &mut Vec<u8>) {
    match item {
        Item::Bytes(bytes) => {
            out.push(0x00);
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        Item::List(items) => {
            out.push(0x01);
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for child in items {
                encode_into(child, out);
            }
        }
    }
}

/// Decode exactly one item, rejecting trailing bytes.
pub fn decode(input: &[u8]) -> Result<Item, ProtocolError> {
    let mut cursor = Cursor { input, pos: 0 };
    let item = decode_at(&mut cursor, 0)?;
    if cursor.pos != input.len() {
        return Err(ProtocolError::TrailingBytes);
    }
    Ok(item)
}

struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.input.len() - self.pos < n {
            return Err(ProtocolError::Truncated);
        }
        let slice = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u32(&mut self) -> Result<u32, ProtocolError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("4-byte slice")))
    }
}

fn decode_at(cursor: &mut Cursor<'_>, depth: usize) -> Result<Item, ProtocolError> {
    if depth > MAX_DEPTH {
        return Err(ProtocolError::DepthExceeded);
    }
    let tag = cursor.take(1)?[0];
    match tag {
        0x00 => {
            let len = cursor.take_u32()? as usize;
            if len > cursor.input.len() - cursor.pos {
                return Err(ProtocolError::LengthOverflow);
            }
            Ok(Item::Bytes(cursor.take(len)?.to_vec()))
        }
        0x01 => {
            let count = cursor.take_u32()? as usize;
            // Each item needs at least a tag and a length prefix.
            if count > (cursor.input.len() - cursor.pos) / 5 + 1 {
                return Err(ProtocolError::LengthOverflow);
            }
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_at(cursor, depth + 1)?);
            }
            Ok(Item::List(items))
        }
        _ => Err(ProtocolError::Malformed(format!("unknown item tag {tag:#04x}"))),
    }
}

/// Canonical byte form of a node-id string list.
///
/// This is the exact byte sequence the delegated-set signature covers.
pub fn encode_node_list(node_ids: &[String]) -> Vec<u8> {
    encode(&Item::List(
        node_ids.iter().map(|id| Item::string(id)).collect(),
    ))
}
