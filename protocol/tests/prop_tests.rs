use proptest::prelude::*;

use kestrel_protocol::wire::{decode, encode, Item};
use kestrel_protocol::{decode_frame, encode_frame, Message};
use kestrel_protocol::messages::VoteElectionRequest;
use kestrel_types::{NodeId, Timestamp};

/// Strategy for arbitrary wire items with bounded depth and width.
fn arb_item() -> impl Strategy<Value = Item> {
    let leaf = prop::collection::vec(any::<u8>(), 0..64).prop_map(Item::Bytes);
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop::collection::vec(inner, 0..8).prop_map(Item::List)
    })
}

proptest! {
    /// Any item survives an encode/decode round trip unchanged.
    #[test]
    fn item_roundtrip(item in arb_item()) {
        let encoded = encode(&item);
        prop_assert_eq!(decode(&encoded).unwrap(), item);
    }

    /// Canonical integers round-trip for the full u64 range.
    #[test]
    fn uint_roundtrip(value in any::<u64>()) {
        prop_assert_eq!(Item::uint(value).as_u64().unwrap(), value);
    }

    /// Canonical 128-bit integers round-trip.
    #[test]
    fn uint128_roundtrip(value in any::<u128>()) {
        prop_assert_eq!(Item::uint128(value).as_u128().unwrap(), value);
    }

    /// The canonical integer encoding never has a leading zero byte.
    #[test]
    fn uint_has_no_leading_zero(value in any::<u64>()) {
        let Item::Bytes(bytes) = Item::uint(value) else { unreachable!() };
        prop_assert!(bytes.first() != Some(&0));
    }

    /// Frames round-trip through the envelope codec.
    #[test]
    fn frame_roundtrip(round in any::<u64>(), tickets in any::<u64>(), secs in any::<u64>(), id in prop::array::uniform32(0u8..)) {
        let msg = Message::VoteElectionRequest(VoteElectionRequest {
            round,
            tickets,
            active_time: Timestamp::new(secs),
            sender: NodeId::new(id),
        });
        let frame = encode_frame(&msg);
        let raw = decode_frame(&frame).unwrap();
        prop_assert_eq!(raw.decode().unwrap(), msg);
    }

    /// Decoding arbitrary garbage never panics.
    #[test]
    fn decode_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode(&bytes);
        let _ = decode_frame(&bytes);
    }
}
