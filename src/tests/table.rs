use std::sync::Arc;

use bytes::Bytes;
use tempfile::tempdir;

use crate::entry::LookupResult;
use crate::iterators::StorageIterator;
use crate::key::KeySlice;
use crate::table::{FileObject, SsTable, SsTableBuilder, SsTableIterator};

fn key_of(i: usize) -> Vec<u8> {
    format!("key_{i:05}").into_bytes()
}

fn value_of(i: usize) -> Vec<u8> {
    format!("value_{i:010}").into_bytes()
}

const NUM_KEYS: usize = 200;

fn build_table(dir: &std::path::Path) -> SsTable {
    // a small block size so the table spans many blocks.
    let mut builder = SsTableBuilder::new(128);
    for i in 0..NUM_KEYS {
        builder
            .add(
                KeySlice::from_slice(&key_of(i), 10),
                Some(value_of(i).as_slice()),
            )
            .unwrap();
    }
    builder.build_for_test(dir.join("1.sst")).unwrap()
}

#[test]
fn test_build_and_open() {
    let dir = tempdir().unwrap();
    let built = build_table(dir.path());
    assert!(built.num_of_blocks() > 1);
    assert_eq!(built.first_key().as_ref(), key_of(0).as_slice());
    assert_eq!(built.last_key().as_ref(), key_of(NUM_KEYS - 1).as_slice());
    assert_eq!(built.min_txn(), 10);
    assert_eq!(built.max_txn(), 10);

    let file = FileObject::open(&dir.path().join("1.sst")).unwrap();
    let reopened = SsTable::open(0, None, file).unwrap();
    assert_eq!(reopened.num_of_blocks(), built.num_of_blocks());
    assert_eq!(reopened.first_key(), built.first_key());
    assert_eq!(reopened.last_key(), built.last_key());
    assert_eq!(reopened.min_txn(), 10);
}

#[test]
fn test_point_lookup() {
    let dir = tempdir().unwrap();
    let table = build_table(dir.path());
    for i in (0..NUM_KEYS).step_by(7) {
        assert_eq!(
            table.get(&key_of(i), 10).unwrap(),
            LookupResult::Put(Bytes::from(value_of(i)))
        );
        // older snapshot than anything in the file
        assert_eq!(table.get(&key_of(i), 5).unwrap(), LookupResult::NotFound);
    }
    assert_eq!(table.get(b"zzz", 10).unwrap(), LookupResult::NotFound);
    assert_eq!(table.get(b"aaa", 10).unwrap(), LookupResult::NotFound);
}

#[test]
fn test_full_scan_and_prev() {
    let dir = tempdir().unwrap();
    let table = Arc::new(build_table(dir.path()));

    let mut iter = SsTableIterator::create_and_seek_to_first(table.clone()).unwrap();
    for i in 0..NUM_KEYS {
        assert!(iter.is_valid());
        assert_eq!(iter.key().key_ref(), key_of(i).as_slice());
        assert_eq!(iter.value(), Some(value_of(i).as_slice()));
        iter.next().unwrap();
    }
    assert!(!iter.is_valid());

    // walk the whole table backwards
    iter.seek_to_last().unwrap();
    for i in (0..NUM_KEYS).rev() {
        assert!(iter.is_valid());
        assert_eq!(iter.key().key_ref(), key_of(i).as_slice());
        iter.prev().unwrap();
    }
    assert!(!iter.is_valid());
}

#[test]
fn test_seek_lands_on_next_key() {
    let dir = tempdir().unwrap();
    let table = Arc::new(build_table(dir.path()));

    let mut iter =
        SsTableIterator::create_and_seek_to_key(table.clone(), KeySlice::from_slice(&key_of(42), u64::MAX))
            .unwrap();
    assert_eq!(iter.key().key_ref(), key_of(42).as_slice());

    // a key between key_00042 and key_00043 seeks to the latter
    iter.seek_to_key(KeySlice::from_slice(b"key_00042a", u64::MAX))
        .unwrap();
    assert_eq!(iter.key().key_ref(), key_of(43).as_slice());

    // past the end leaves the cursor invalid, recoverable by prev
    iter.seek_to_key(KeySlice::from_slice(b"zzzz", u64::MAX)).unwrap();
    assert!(!iter.is_valid());
    iter.prev().unwrap();
    assert!(iter.is_valid());
    assert_eq!(iter.key().key_ref(), key_of(NUM_KEYS - 1).as_slice());
}

#[test]
fn test_same_user_key_never_splits_blocks() {
    let dir = tempdir().unwrap();
    let mut builder = SsTableBuilder::new(64);
    // many versions of one key, far more than one 64-byte block holds.
    for txn in (0..50u64).rev() {
        builder
            .add(
                KeySlice::from_slice(b"hot", txn),
                Some(format!("v{txn}").as_bytes()),
            )
            .unwrap();
    }
    builder
        .add(KeySlice::from_slice(b"tail", 0), Some(b"end"))
        .unwrap();
    let table = builder.build_for_test(dir.path().join("2.sst")).unwrap();

    // every version of "hot" lives in a single block, so any snapshot
    // resolves with one probe.
    for txn in 0..50u64 {
        assert_eq!(
            table.get(b"hot", txn).unwrap(),
            LookupResult::Put(Bytes::from(format!("v{txn}"))),
        );
    }
}
