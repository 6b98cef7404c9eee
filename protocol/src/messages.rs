//! Protocol message frames.
//!
//! One struct per frame, plus the [`Message`] envelope the dispatch layer
//! matches on. Codes `0x03`–`0x10` are the chain-sync frames inherited from
//! the underlying sync subsystem; `0x11`–`0x15` carry the election and
//! big-period protocols.

use crate::error::ProtocolError;
use crate::wire::{self, Item};
use kestrel_chain::{Header, Receipt, Transaction};
use kestrel_chain::block::TxRoot;
use kestrel_types::{Address, BlockHash, NodeId, PublicKey, Signature, Timestamp, TxHash};

/// Wire message codes.
pub mod codes {
    pub const GET_BLOCK_HEADERS: u8 = 0x03;
    pub const BLOCK_HEADERS: u8 = 0x04;
    pub const GET_BLOCK_BODIES: u8 = 0x05;
    pub const BLOCK_BODIES: u8 = 0x06;
    pub const GET_NODE_DATA: u8 = 0x0d;
    pub const NODE_DATA: u8 = 0x0e;
    pub const GET_RECEIPTS: u8 = 0x0f;
    pub const RECEIPTS: u8 = 0x10;
    pub const VOTE_ELECTION_REQUEST: u8 = 0x11;
    pub const VOTE_ELECTION_RESPONSE: u8 = 0x12;
    pub const VOTE_ELECTION_BROADCAST: u8 = 0x13;
    pub const SYNC_BIGPERIOD_REQUEST: u8 = 0x14;
    pub const SYNC_BIGPERIOD_RESPONSE: u8 = 0x15;
}

/// Election vote state carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteState {
    Looking,
    Selected,
    Agree,
    MismatchedRound,
}

impl VoteState {
    pub fn to_u8(self) -> u8 {
        match self {
            VoteState::Looking => 1,
            VoteState::Selected => 2,
            VoteState::Agree => 3,
            VoteState::MismatchedRound => 4,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(VoteState::Looking),
            2 => Ok(VoteState::Selected),
            3 => Ok(VoteState::Agree),
            4 => Ok(VoteState::MismatchedRound),
            _ => Err(ProtocolError::Malformed(format!(
                "unknown vote state {value}"
            ))),
        }
    }
}

/// Big-period confirmation state carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeriodState {
    Init,
    Confirmed,
}

impl PeriodState {
    pub fn to_u8(self) -> u8 {
        match self {
            PeriodState::Init => 1,
            PeriodState::Confirmed => 2,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(PeriodState::Init),
            2 => Ok(PeriodState::Confirmed),
            _ => Err(ProtocolError::Malformed(format!(
                "unknown period state {value}"
            ))),
        }
    }
}

/// Header-query origin: by hash or by number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashOrNumber {
    Hash(BlockHash),
    Number(u64),
}

// ── Chain-sync frames (inherited) ──────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetBlockHeaders {
    pub origin: HashOrNumber,
    pub amount: u64,
    pub skip: u64,
    pub reverse: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeaders {
    pub headers: Vec<Header>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetBlockBodies {
    pub hashes: Vec<BlockHash>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockBodies {
    pub bodies: Vec<Vec<Transaction>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetNodeData {
    pub hashes: Vec<BlockHash>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeData {
    pub items: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetReceipts {
    pub hashes: Vec<BlockHash>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipts {
    pub receipts: Vec<Vec<Receipt>>,
}

// ── Election frames ────────────────────────────────────────────────────

/// A peer proposing itself as election node with its ticket count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteElectionRequest {
    pub round: u64,
    pub tickets: u64,
    pub active_time: Timestamp,
    pub sender: NodeId,
}

/// Reply to a vote request. Never carries [`VoteState::Selected`]; such
/// frames are rejected at decode as malformed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteElectionResponse {
    pub round: u64,
    pub tickets: u64,
    pub active_time: Timestamp,
    pub state: VoteState,
    pub node_id: NodeId,
}

/// Final commit announcing the winning election node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastVotedElection {
    pub round: u64,
    pub tickets: u64,
    pub active_time: Timestamp,
    pub state: VoteState,
    pub winner: NodeId,
}

// ── Big-period sync frames ─────────────────────────────────────────────

/// Proposal of the next big period's delegated node set.
///
/// Carries the sender's public key so receivers can check the
/// `sender == hash(signer_pubkey)` binding before verifying the signature
/// over the node list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncBigPeriodRequest {
    pub round: u64,
    pub active_time: Timestamp,
    pub delegated_nodes: Vec<String>,
    pub signature: Signature,
    pub sender: NodeId,
    pub signer_pubkey: PublicKey,
}

/// Unicast reply echoing the responder's current period view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncBigPeriodResponse {
    pub round: u64,
    pub active_time: Timestamp,
    pub delegated_nodes: Vec<String>,
    pub signature: Signature,
    pub state: PeriodState,
    pub sender: NodeId,
    pub signer_pubkey: PublicKey,
}

// ── Envelope ───────────────────────────────────────────────────────────

/// A fully decoded protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    GetBlockHeaders(GetBlockHeaders),
    BlockHeaders(BlockHeaders),
    GetBlockBodies(GetBlockBodies),
    BlockBodies(BlockBodies),
    GetNodeData(GetNodeData),
    NodeData(NodeData),
    GetReceipts(GetReceipts),
    Receipts(Receipts),
    VoteElectionRequest(VoteElectionRequest),
    VoteElectionResponse(VoteElectionResponse),
    BroadcastVotedElection(BroadcastVotedElection),
    SyncBigPeriodRequest(SyncBigPeriodRequest),
    SyncBigPeriodResponse(SyncBigPeriodResponse),
}

impl Message {
    pub fn code(&self) -> u8 {
        match self {
            Message::GetBlockHeaders(_) => codes::GET_BLOCK_HEADERS,
            Message::BlockHeaders(_) => codes::BLOCK_HEADERS,
            Message::GetBlockBodies(_) => codes::GET_BLOCK_BODIES,
            Message::BlockBodies(_) => codes::BLOCK_BODIES,
            Message::GetNodeData(_) => codes::GET_NODE_DATA,
            Message::NodeData(_) => codes::NODE_DATA,
            Message::GetReceipts(_) => codes::GET_RECEIPTS,
            Message::Receipts(_) => codes::RECEIPTS,
            Message::VoteElectionRequest(_) => codes::VOTE_ELECTION_REQUEST,
            Message::VoteElectionResponse(_) => codes::VOTE_ELECTION_RESPONSE,
            Message::BroadcastVotedElection(_) => codes::VOTE_ELECTION_BROADCAST,
            Message::SyncBigPeriodRequest(_) => codes::SYNC_BIGPERIOD_REQUEST,
            Message::SyncBigPeriodResponse(_) => codes::SYNC_BIGPERIOD_RESPONSE,
        }
    }

    /// Encode this message's payload (without the frame envelope).
    pub fn encode_payload(&self) -> Vec<u8> {
        wire::encode(&self.to_item())
    }

    /// Decode a payload for the given message code.
    pub fn decode(code: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let item = wire::decode(payload)?;
        match code {
            codes::GET_BLOCK_HEADERS => {
                let fields = expect_fields(&item, 4)?;
                Ok(Message::GetBlockHeaders(GetBlockHeaders {
                    origin: hash_or_number_from_item(&fields[0])?,
                    amount: fields[1].as_u64()?,
                    skip: fields[2].as_u64()?,
                    reverse: fields[3].as_bool()?,
                }))
            }
            codes::BLOCK_HEADERS => {
                let headers = item
                    .as_list()?
                    .iter()
                    .map(header_from_item)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Message::BlockHeaders(BlockHeaders { headers }))
            }
            codes::GET_BLOCK_BODIES => Ok(Message::GetBlockBodies(GetBlockBodies {
                hashes: hashes_from_item(&item)?,
            })),
            codes::BLOCK_BODIES => {
                let bodies = item
                    .as_list()?
                    .iter()
                    .map(|body| {
                        body.as_list()?
                            .iter()
                            .map(transaction_from_item)
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Message::BlockBodies(BlockBodies { bodies }))
            }
            codes::GET_NODE_DATA => Ok(Message::GetNodeData(GetNodeData {
                hashes: hashes_from_item(&item)?,
            })),
            codes::NODE_DATA => {
                let items = item
                    .as_list()?
                    .iter()
                    .map(|blob| blob.as_bytes().map(|b| b.to_vec()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Message::NodeData(NodeData { items }))
            }
            codes::GET_RECEIPTS => Ok(Message::GetReceipts(GetReceipts {
                hashes: hashes_from_item(&item)?,
            })),
            codes::RECEIPTS => {
                let receipts = item
                    .as_list()?
                    .iter()
                    .map(|block| {
                        block
                            .as_list()?
                            .iter()
                            .map(receipt_from_item)
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Message::Receipts(Receipts { receipts }))
            }
            codes::VOTE_ELECTION_REQUEST => {
                let fields = expect_fields(&item, 4)?;
                Ok(Message::VoteElectionRequest(VoteElectionRequest {
                    round: fields[0].as_u64()?,
                    tickets: fields[1].as_u64()?,
                    active_time: Timestamp::new(fields[2].as_u64()?),
                    sender: NodeId::new(fields[3].as_array()?),
                }))
            }
            codes::VOTE_ELECTION_RESPONSE => {
                let fields = expect_fields(&item, 5)?;
                let state = VoteState::from_u8(u8_field(&fields[3])?)?;
                if state == VoteState::Selected {
                    return Err(ProtocolError::DisallowedState(
                        "vote response must not carry SELECTED",
                    ));
                }
                Ok(Message::VoteElectionResponse(VoteElectionResponse {
                    round: fields[0].as_u64()?,
                    tickets: fields[1].as_u64()?,
                    active_time: Timestamp::new(fields[2].as_u64()?),
                    state,
                    node_id: NodeId::new(fields[4].as_array()?),
                }))
            }
            codes::VOTE_ELECTION_BROADCAST => {
                let fields = expect_fields(&item, 5)?;
                Ok(Message::BroadcastVotedElection(BroadcastVotedElection {
                    round: fields[0].as_u64()?,
                    tickets: fields[1].as_u64()?,
                    active_time: Timestamp::new(fields[2].as_u64()?),
                    state: VoteState::from_u8(u8_field(&fields[3])?)?,
                    winner: NodeId::new(fields[4].as_array()?),
                }))
            }
            codes::SYNC_BIGPERIOD_REQUEST => {
                let fields = expect_fields(&item, 6)?;
                Ok(Message::SyncBigPeriodRequest(SyncBigPeriodRequest {
                    round: fields[0].as_u64()?,
                    active_time: Timestamp::new(fields[1].as_u64()?),
                    delegated_nodes: strings_from_item(&fields[2])?,
                    signature: Signature(fields[3].as_array()?),
                    sender: NodeId::new(fields[4].as_array()?),
                    signer_pubkey: PublicKey(fields[5].as_array()?),
                }))
            }
            codes::SYNC_BIGPERIOD_RESPONSE => {
                let fields = expect_fields(&item, 7)?;
                Ok(Message::SyncBigPeriodResponse(SyncBigPeriodResponse {
                    round: fields[0].as_u64()?,
                    active_time: Timestamp::new(fields[1].as_u64()?),
                    delegated_nodes: strings_from_item(&fields[2])?,
                    signature: Signature(fields[3].as_array()?),
                    state: PeriodState::from_u8(u8_field(&fields[4])?)?,
                    sender: NodeId::new(fields[5].as_array()?),
                    signer_pubkey: PublicKey(fields[6].as_array()?),
                }))
            }
            other => Err(ProtocolError::UnknownCode(other)),
        }
    }

    fn to_item(&self) -> Item {
        match self {
            Message::GetBlockHeaders(m) => Item::List(vec![
                hash_or_number_to_item(&m.origin),
                Item::uint(m.amount),
                Item::uint(m.skip),
                Item::uint(m.reverse as u64),
            ]),
            Message::BlockHeaders(m) => {
                Item::List(m.headers.iter().map(header_to_item).collect())
            }
            Message::GetBlockBodies(m) => hashes_to_item(&m.hashes),
            Message::BlockBodies(m) => Item::List(
                m.bodies
                    .iter()
                    .map(|body| Item::List(body.iter().map(transaction_to_item).collect()))
                    .collect(),
            ),
            Message::GetNodeData(m) => hashes_to_item(&m.hashes),
            Message::NodeData(m) => Item::List(
                m.items
                    .iter()
                    .map(|blob| Item::Bytes(blob.clone()))
                    .collect(),
            ),
            Message::GetReceipts(m) => hashes_to_item(&m.hashes),
            Message::Receipts(m) => Item::List(
                m.receipts
                    .iter()
                    .map(|block| Item::List(block.iter().map(receipt_to_item).collect()))
                    .collect(),
            ),
            Message::VoteElectionRequest(m) => Item::List(vec![
                Item::uint(m.round),
                Item::uint(m.tickets),
                Item::uint(m.active_time.as_secs()),
                Item::Bytes(m.sender.as_bytes().to_vec()),
            ]),
            Message::VoteElectionResponse(m) => Item::List(vec![
                Item::uint(m.round),
                Item::uint(m.tickets),
                Item::uint(m.active_time.as_secs()),
                Item::uint(m.state.to_u8() as u64),
                Item::Bytes(m.node_id.as_bytes().to_vec()),
            ]),
            Message::BroadcastVotedElection(m) => Item::List(vec![
                Item::uint(m.round),
                Item::uint(m.tickets),
                Item::uint(m.active_time.as_secs()),
                Item::uint(m.state.to_u8() as u64),
                Item::Bytes(m.winner.as_bytes().to_vec()),
            ]),
            Message::SyncBigPeriodRequest(m) => Item::List(vec![
                Item::uint(m.round),
                Item::uint(m.active_time.as_secs()),
                strings_to_item(&m.delegated_nodes),
                Item::Bytes(m.signature.as_bytes().to_vec()),
                Item::Bytes(m.sender.as_bytes().to_vec()),
                Item::Bytes(m.signer_pubkey.as_bytes().to_vec()),
            ]),
            Message::SyncBigPeriodResponse(m) => Item::List(vec![
                Item::uint(m.round),
                Item::uint(m.active_time.as_secs()),
                strings_to_item(&m.delegated_nodes),
                Item::Bytes(m.signature.as_bytes().to_vec()),
                Item::uint(m.state.to_u8() as u64),
                Item::Bytes(m.sender.as_bytes().to_vec()),
                Item::Bytes(m.signer_pubkey.as_bytes().to_vec()),
            ]),
        }
    }
}

// ── Field helpers ──────────────────────────────────────────────────────

fn u8_field(item: &Item) -> Result<u8, ProtocolError> {
    u8::try_from(item.as_u64()?)
        .map_err(|_| ProtocolError::Malformed("state value out of range".into()))
}

fn expect_fields(item: &Item, n: usize) -> Result<&[Item], ProtocolError> {
    let fields = item.as_list()?;
    if fields.len() != n {
        return Err(ProtocolError::Malformed(format!(
            "expected {n} fields, got {}",
            fields.len()
        )));
    }
    Ok(fields)
}

fn hash_or_number_to_item(origin: &HashOrNumber) -> Item {
    match origin {
        HashOrNumber::Hash(hash) => Item::List(vec![
            Item::uint(0),
            Item::Bytes(hash.as_bytes().to_vec()),
        ]),
        HashOrNumber::Number(number) => Item::List(vec![Item::uint(1), Item::uint(*number)]),
    }
}

fn hash_or_number_from_item(item: &Item) -> Result<HashOrNumber, ProtocolError> {
    let fields = expect_fields(item, 2)?;
    match fields[0].as_u64()? {
        0 => Ok(HashOrNumber::Hash(BlockHash::new(fields[1].as_array()?))),
        1 => Ok(HashOrNumber::Number(fields[1].as_u64()?)),
        _ => Err(ProtocolError::Malformed("bad origin tag".into())),
    }
}

fn hashes_to_item(hashes: &[BlockHash]) -> Item {
    Item::List(
        hashes
            .iter()
            .map(|h| Item::Bytes(h.as_bytes().to_vec()))
            .collect(),
    )
}

fn hashes_from_item(item: &Item) -> Result<Vec<BlockHash>, ProtocolError> {
    item.as_list()?
        .iter()
        .map(|h| Ok(BlockHash::new(h.as_array()?)))
        .collect()
}

fn strings_to_item(values: &[String]) -> Item {
    Item::List(values.iter().map(|s| Item::string(s)).collect())
}

fn strings_from_item(item: &Item) -> Result<Vec<String>, ProtocolError> {
    item.as_list()?.iter().map(|s| s.as_string()).collect()
}

fn option_address_to_item(address: &Option<Address>) -> Item {
    match address {
        Some(addr) => Item::Bytes(addr.as_bytes().to_vec()),
        None => Item::Bytes(Vec::new()),
    }
}

fn option_address_from_item(item: &Item) -> Result<Option<Address>, ProtocolError> {
    let bytes = item.as_bytes()?;
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(Address::new(item.as_array()?)))
}

pub(crate) fn header_to_item(header: &Header) -> Item {
    Item::List(vec![
        Item::Bytes(header.parent_hash.as_bytes().to_vec()),
        Item::uint(header.number),
        Item::uint(header.timestamp.as_secs()),
        Item::Bytes(header.producer.as_bytes().to_vec()),
        Item::Bytes(header.state_root.as_bytes().to_vec()),
        Item::Bytes(header.tx_root.0.to_vec()),
        Item::Bytes(header.extra.clone()),
    ])
}

pub(crate) fn header_from_item(item: &Item) -> Result<Header, ProtocolError> {
    let fields = expect_fields(item, 7)?;
    Ok(Header {
        parent_hash: BlockHash::new(fields[0].as_array()?),
        number: fields[1].as_u64()?,
        timestamp: Timestamp::new(fields[2].as_u64()?),
        producer: NodeId::new(fields[3].as_array()?),
        state_root: BlockHash::new(fields[4].as_array()?),
        tx_root: TxRoot(fields[5].as_array()?),
        extra: fields[6].as_bytes()?.to_vec(),
    })
}

pub(crate) fn transaction_to_item(tx: &Transaction) -> Item {
    Item::List(vec![
        Item::uint(tx.nonce),
        Item::Bytes(tx.from.as_bytes().to_vec()),
        option_address_to_item(&tx.to),
        Item::uint128(tx.value),
        Item::Bytes(tx.payload.clone()),
        option_address_to_item(&tx.dapp),
    ])
}

pub(crate) fn transaction_from_item(item: &Item) -> Result<Transaction, ProtocolError> {
    let fields = expect_fields(item, 6)?;
    Ok(Transaction {
        nonce: fields[0].as_u64()?,
        from: Address::new(fields[1].as_array()?),
        to: option_address_from_item(&fields[2])?,
        value: fields[3].as_u128()?,
        payload: fields[4].as_bytes()?.to_vec(),
        dapp: option_address_from_item(&fields[5])?,
    })
}

fn receipt_to_item(receipt: &Receipt) -> Item {
    Item::List(vec![
        Item::Bytes(receipt.tx_hash.as_bytes().to_vec()),
        Item::uint(receipt.block_number),
        Item::uint(receipt.success as u64),
    ])
}

fn receipt_from_item(item: &Item) -> Result<Receipt, ProtocolError> {
    let fields = expect_fields(item, 3)?;
    Ok(Receipt {
        tx_hash: TxHash::new(fields[0].as_array()?),
        block_number: fields[1].as_u64()?,
        success: fields[2].as_bool()?,
    })
}
