use bytes::Bytes;

use crate::block::{Block, BlockBuilder, BlockIterator};
use crate::entry::{Entry, LookupResult, ValueKind};
use crate::error::Error;
use crate::iterators::StorageIterator;
use crate::key::KeySlice;

fn sample_block() -> Block {
    let mut builder = BlockBuilder::new();
    // per key: txn descending. "banana" carries three versions plus a
    // tombstone at the top.
    builder
        .add(KeySlice::from_slice(b"apple", 7), Some(b"red"))
        .unwrap();
    builder
        .add(KeySlice::from_slice(b"apple", 3), Some(b"green"))
        .unwrap();
    builder.add(KeySlice::from_slice(b"banana", 9), None).unwrap();
    builder
        .add(KeySlice::from_slice(b"banana", 6), Some(b"yellow"))
        .unwrap();
    builder
        .add(KeySlice::from_slice(b"banana", 2), Some(b"brown"))
        .unwrap();
    builder
        .add(KeySlice::from_slice(b"cherry", 5), Some(b"dark"))
        .unwrap();
    Block::decode(builder.finish()).unwrap()
}

#[test]
fn test_encode_decode_round_trip() {
    let block = sample_block();
    assert_eq!(block.num_entries(), 6);

    let entry = |key: &'static [u8], txn, value: Option<&'static [u8]>| Entry {
        key: Bytes::from_static(key),
        kind: value.map_or(ValueKind::Deleted, |_| ValueKind::Put),
        value: value.map(Bytes::from_static),
        txn,
    };
    let expected = vec![
        entry(b"apple", 7, Some(b"red")),
        entry(b"apple", 3, Some(b"green")),
        entry(b"banana", 9, None),
        entry(b"banana", 6, Some(b"yellow")),
        entry(b"banana", 2, Some(b"brown")),
        entry(b"cherry", 5, Some(b"dark")),
    ];
    let mut iter = BlockIterator::create_and_seek_to_first(std::sync::Arc::new(block));
    for want in expected {
        assert!(iter.is_valid());
        let got = Entry {
            key: Bytes::copy_from_slice(iter.key().key_ref()),
            kind: iter.kind(),
            value: iter.value().map(Bytes::copy_from_slice),
            txn: iter.txn(),
        };
        assert_eq!(got, want);
        iter.next().unwrap();
    }
    assert!(!iter.is_valid());
}

#[test]
fn test_point_lookup_visibility() {
    let block = sample_block();

    assert_eq!(block.get(b"apple", 10), LookupResult::Put(Bytes::from_static(b"red")));
    assert_eq!(block.get(b"apple", 7), LookupResult::Put(Bytes::from_static(b"red")));
    // txn 5 only sees the txn-3 version.
    assert_eq!(block.get(b"apple", 5), LookupResult::Put(Bytes::from_static(b"green")));
    // nothing at or before txn 2.
    assert_eq!(block.get(b"apple", 2), LookupResult::NotFound);

    assert_eq!(block.get(b"banana", 9), LookupResult::Deleted);
    assert_eq!(
        block.get(b"banana", 8),
        LookupResult::Put(Bytes::from_static(b"yellow"))
    );
    assert_eq!(
        block.get(b"banana", 3),
        LookupResult::Put(Bytes::from_static(b"brown"))
    );

    assert_eq!(block.get(b"durian", u64::MAX), LookupResult::NotFound);
}

#[test]
fn test_binary_search_matches_linear_scan() {
    let block = sample_block();
    let probes: &[(&[u8], u64)] = &[
        (b"apple", 0),
        (b"apple", 3),
        (b"apple", 100),
        (b"banana", 2),
        (b"banana", 6),
        (b"banana", 9),
        (b"cherry", 5),
        (b"aaaa", 9),
        (b"zzzz", 9),
    ];
    for &(key, txn) in probes {
        // linear reference: first entry in order at or after (key, txn).
        let mut linear = LookupResult::NotFound;
        for idx in 0..block.num_entries() {
            let entry = block.entry_at(idx);
            if entry.key.key_ref() == key && entry.key.txn() <= txn {
                linear = match entry.kind {
                    ValueKind::Put => {
                        LookupResult::Put(Bytes::copy_from_slice(entry.value.unwrap()))
                    }
                    ValueKind::Deleted => LookupResult::Deleted,
                };
                break;
            }
        }
        assert_eq!(block.get(key, txn), linear, "mismatch at {:?}@{}", key, txn);
    }
}

#[test]
fn test_iterator_seek_and_prev() {
    let block = std::sync::Arc::new(sample_block());

    let mut iter = BlockIterator::create_and_seek_to_key(block.clone(), KeySlice::from_slice(b"banana", 6));
    assert!(iter.is_valid());
    assert_eq!(iter.key().key_ref(), b"banana");
    assert_eq!(iter.txn(), 6);

    iter.prev().unwrap();
    assert_eq!(iter.key().key_ref(), b"banana");
    assert_eq!(iter.txn(), 9);
    assert_eq!(iter.kind(), ValueKind::Deleted);

    iter.seek_to_last().unwrap();
    assert_eq!(iter.key().key_ref(), b"cherry");

    iter.seek_to_first().unwrap();
    iter.prev().unwrap();
    assert!(!iter.is_valid());
}

#[test]
fn test_decode_rejects_corruption() {
    let encoded = {
        let mut builder = BlockBuilder::new();
        builder
            .add(KeySlice::from_slice(b"k", 1), Some(b"v"))
            .unwrap();
        builder.finish()
    };

    // truncated extra section
    assert!(matches!(
        Block::decode(encoded.slice(0..8)),
        Err(Error::CorruptBlock(_))
    ));

    // flip the value-kind byte to an undefined tag
    let mut bad = encoded.to_vec();
    bad[0] = 7;
    assert!(matches!(
        Block::decode(Bytes::from(bad)),
        Err(Error::CorruptBlock(_))
    ));
}

#[test]
fn test_builder_reset_reuses_buffers() {
    let mut builder = BlockBuilder::new();
    builder
        .add(KeySlice::from_slice(b"a", 1), Some(b"1"))
        .unwrap();
    let first = builder.finish();
    builder.reset();
    assert!(builder.is_empty());
    builder
        .add(KeySlice::from_slice(b"a", 1), Some(b"1"))
        .unwrap();
    assert_eq!(first, builder.finish());
}
