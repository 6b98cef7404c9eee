//! Server side of the inherited chain-sync protocol: answers header,
//! body, node-data, and receipt queries from the local chain.

use kestrel_chain::{BlockChain, Header, Receipt, Transaction};
use kestrel_protocol::messages::{GetBlockHeaders, HashOrNumber};
use kestrel_types::BlockHash;

/// Maximum headers served per request.
pub const MAX_HEADERS_SERVE: u64 = 192;
/// Maximum block bodies served per request.
pub const MAX_BODIES_SERVE: usize = 128;
/// Maximum node-data blobs served per request.
pub const MAX_NODE_DATA_SERVE: usize = 256;
/// Maximum receipt sets served per request.
pub const MAX_RECEIPTS_SERVE: usize = 128;

/// Answer a header query.
///
/// Supports origin by hash or number, a bounded `amount`, `skip` gaps, and
/// both directions. Walks gracefully off either chain endpoint, and treats
/// skip arithmetic that would overflow as the end of the walk.
pub fn serve_headers(chain: &BlockChain, query: &GetBlockHeaders) -> Vec<Header> {
    let amount = query.amount.min(MAX_HEADERS_SERVE) as usize;
    if amount == 0 {
        return Vec::new();
    }

    let mut number = match query.origin {
        HashOrNumber::Hash(hash) => match chain.get_block_by_hash(&hash) {
            Some(block) => block.number(),
            None => return Vec::new(),
        },
        HashOrNumber::Number(number) => number,
    };

    let mut headers = Vec::new();
    loop {
        let Some(block) = chain.get_block_by_number(number) else {
            break;
        };
        headers.push(block.header.clone());
        if headers.len() >= amount {
            break;
        }
        if query.reverse {
            let Some(step) = query.skip.checked_add(1) else {
                break;
            };
            let Some(previous) = number.checked_sub(step) else {
                break;
            };
            number = previous;
        } else {
            let Some(next) = query
                .skip
                .checked_add(1)
                .and_then(|step| number.checked_add(step))
            else {
                break;
            };
            number = next;
        }
    }
    headers
}

/// Answer a body query. Unknown hashes are silently skipped.
pub fn serve_bodies(chain: &BlockChain, hashes: &[BlockHash]) -> Vec<Vec<Transaction>> {
    hashes
        .iter()
        .take(MAX_BODIES_SERVE)
        .filter_map(|hash| {
            chain
                .get_block_by_hash(hash)
                .map(|block| block.transactions.clone())
        })
        .collect()
}

/// Answer a node-data query. Unknown hashes are silently skipped.
pub fn serve_node_data(chain: &BlockChain, hashes: &[BlockHash]) -> Vec<Vec<u8>> {
    hashes
        .iter()
        .take(MAX_NODE_DATA_SERVE)
        .filter_map(|hash| chain.node_data(hash).cloned())
        .collect()
}

/// Answer a receipts query. Known blocks without receipts (the genesis)
/// yield an empty set; unknown hashes are skipped.
pub fn serve_receipts(chain: &BlockChain, hashes: &[BlockHash]) -> Vec<Vec<Receipt>> {
    hashes
        .iter()
        .take(MAX_RECEIPTS_SERVE)
        .filter_map(|hash| {
            chain.get_block_by_hash(hash)?;
            Some(
                chain
                    .receipts_by_hash(hash)
                    .cloned()
                    .unwrap_or_default(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_chain::block::{Block, TxRoot};
    use kestrel_chain::StateDb;
    use kestrel_types::{NodeId, Timestamp, TxHash};

    /// A linear chain of `length` empty blocks above genesis.
    fn chain_of(length: u64) -> BlockChain {
        let state = StateDb::new();
        let genesis = Block {
            header: Header {
                parent_hash: BlockHash::ZERO,
                number: 0,
                timestamp: Timestamp::EPOCH,
                producer: NodeId::ZERO,
                state_root: state.root(),
                tx_root: TxRoot::EMPTY,
                extra: Vec::new(),
            },
            transactions: Vec::new(),
        };
        let mut chain = BlockChain::new(genesis, state);
        for i in 1..=length {
            let head = chain.current_block().clone();
            let block = Block {
                header: Header {
                    parent_hash: head.hash(),
                    number: i,
                    timestamp: Timestamp::new(i * 10),
                    producer: NodeId::new([1u8; 32]),
                    state_root: StateDb::new().root(),
                    tx_root: TxRoot::EMPTY,
                    extra: Vec::new(),
                },
                transactions: Vec::new(),
            };
            let receipts = vec![Receipt {
                tx_hash: TxHash::new([i as u8; 32]),
                block_number: i,
                success: true,
            }];
            chain.insert_block(block, receipts, StateDb::new()).unwrap();
        }
        chain
    }

    fn numbers(headers: &[Header]) -> Vec<u64> {
        headers.iter().map(|h| h.number).collect()
    }

    fn query(origin: HashOrNumber, amount: u64, skip: u64, reverse: bool) -> GetBlockHeaders {
        GetBlockHeaders {
            origin,
            amount,
            skip,
            reverse,
        }
    }

    #[test]
    fn single_header_by_hash_and_number() {
        let chain = chain_of(16);
        let mid = chain.get_block_by_number(8).unwrap();

        let by_hash = serve_headers(&chain, &query(HashOrNumber::Hash(mid.hash()), 1, 0, false));
        assert_eq!(numbers(&by_hash), vec![8]);

        let by_number = serve_headers(&chain, &query(HashOrNumber::Number(8), 1, 0, false));
        assert_eq!(numbers(&by_number), vec![8]);
    }

    #[test]
    fn multiple_headers_both_directions() {
        let chain = chain_of(16);

        let forward = serve_headers(&chain, &query(HashOrNumber::Number(8), 3, 0, false));
        assert_eq!(numbers(&forward), vec![8, 9, 10]);

        let backward = serve_headers(&chain, &query(HashOrNumber::Number(8), 3, 0, true));
        assert_eq!(numbers(&backward), vec![8, 7, 6]);
    }

    #[test]
    fn skip_lists_both_directions() {
        let chain = chain_of(32);

        let forward = serve_headers(&chain, &query(HashOrNumber::Number(8), 3, 3, false));
        assert_eq!(numbers(&forward), vec![8, 12, 16]);

        let backward = serve_headers(&chain, &query(HashOrNumber::Number(16), 3, 3, true));
        assert_eq!(numbers(&backward), vec![16, 12, 8]);
    }

    #[test]
    fn endpoints_are_retrievable() {
        let chain = chain_of(16);

        let genesis = serve_headers(&chain, &query(HashOrNumber::Number(0), 1, 0, false));
        assert_eq!(numbers(&genesis), vec![0]);

        let head = serve_headers(&chain, &query(HashOrNumber::Number(16), 1, 0, false));
        assert_eq!(numbers(&head), vec![16]);
    }

    #[test]
    fn walks_off_the_head_gracefully() {
        let chain = chain_of(16);
        // Requesting past the head truncates mid-skip.
        let result = serve_headers(&chain, &query(HashOrNumber::Number(12), 3, 3, false));
        assert_eq!(numbers(&result), vec![12, 16]);
    }

    #[test]
    fn walks_off_the_genesis_gracefully() {
        let chain = chain_of(16);
        let result = serve_headers(&chain, &query(HashOrNumber::Number(4), 3, 3, true));
        assert_eq!(numbers(&result), vec![4, 0]);

        let past_genesis = serve_headers(&chain, &query(HashOrNumber::Number(2), 5, 0, true));
        assert_eq!(numbers(&past_genesis), vec![2, 1, 0]);
    }

    #[test]
    fn skip_overflow_ends_the_walk() {
        let chain = chain_of(8);
        // skip + 1 overflows u64: only the origin comes back.
        let max_skip = serve_headers(
            &chain,
            &query(HashOrNumber::Number(3), 2, u64::MAX, false),
        );
        assert_eq!(numbers(&max_skip), vec![3]);

        let near_max = serve_headers(
            &chain,
            &query(HashOrNumber::Number(3), 2, u64::MAX - 1, false),
        );
        assert_eq!(numbers(&near_max), vec![3]);
    }

    #[test]
    fn amount_capped_at_server_limit() {
        let chain = chain_of(300);
        let result = serve_headers(
            &chain,
            &query(HashOrNumber::Number(0), 10_000, 0, false),
        );
        assert_eq!(result.len(), MAX_HEADERS_SERVE as usize);
    }

    #[test]
    fn unknown_origin_yields_nothing() {
        let chain = chain_of(8);
        let unknown = BlockHash::new([0xEE; 32]);
        assert!(serve_headers(&chain, &query(HashOrNumber::Hash(unknown), 1, 0, false)).is_empty());
        assert!(serve_headers(&chain, &query(HashOrNumber::Number(99), 1, 0, false)).is_empty());
    }

    #[test]
    fn bodies_skip_unknown_hashes() {
        let chain = chain_of(4);
        let known = chain.get_block_by_number(2).unwrap().hash();
        let unknown = BlockHash::new([0xEE; 32]);

        let bodies = serve_bodies(&chain, &[unknown, known, unknown]);
        assert_eq!(bodies.len(), 1);
    }

    #[test]
    fn receipts_serve_known_blocks() {
        let chain = chain_of(4);
        let genesis = chain.genesis().hash();
        let block2 = chain.get_block_by_number(2).unwrap().hash();
        let unknown = BlockHash::new([0xEE; 32]);

        let receipts = serve_receipts(&chain, &[genesis, block2, unknown]);
        assert_eq!(receipts.len(), 2);
        assert!(receipts[0].is_empty()); // genesis has no receipts
        assert_eq!(receipts[1].len(), 1);
        assert_eq!(receipts[1][0].block_number, 2);
    }

    #[test]
    fn node_data_serves_state_snapshots() {
        let chain = chain_of(2);
        let root = chain.current_block().header.state_root;
        let served = serve_node_data(&chain, &[root]);
        assert_eq!(served.len(), 1);
        assert!(!served[0].is_empty());
    }
}
