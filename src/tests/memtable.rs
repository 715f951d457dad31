use std::ops::Bound;

use bytes::Bytes;

use crate::entry::LookupResult;
use crate::iterators::StorageIterator;
use crate::key::KeySlice;
use crate::memtable::MemTable;

#[test]
fn test_put_get_delete_versions() {
    let memtable = MemTable::create(0);
    memtable.put(b"apple", b"v1", 0).unwrap();
    assert_eq!(
        memtable.get(b"apple", 0),
        LookupResult::Put(Bytes::from_static(b"v1"))
    );

    memtable.delete(b"apple", 1).unwrap();
    assert_eq!(memtable.get(b"apple", 1), LookupResult::Deleted);
    // the older snapshot still sees the put.
    assert_eq!(
        memtable.get(b"apple", 0),
        LookupResult::Put(Bytes::from_static(b"v1"))
    );

    assert_eq!(memtable.get(b"pear", 5), LookupResult::NotFound);
}

#[test]
fn test_byte_size_accounting() {
    let memtable = MemTable::create(0);
    assert_eq!(memtable.byte_size(), 0);

    // put: 1 + 4 + key + 4 + value + 8
    memtable.put(b"abc", b"xy", 1).unwrap();
    assert_eq!(memtable.byte_size(), 1 + 4 + 3 + 4 + 2 + 8);

    // tombstone: 1 + 4 + key + 8
    memtable.delete(b"abc", 2).unwrap();
    assert_eq!(memtable.byte_size(), (1 + 4 + 3 + 4 + 2 + 8) + (1 + 4 + 3 + 8));
}

#[test]
fn test_scan_bounds_and_versions() {
    let memtable = MemTable::create(0);
    memtable.put(b"a", b"1", 1).unwrap();
    memtable.put(b"b", b"2", 2).unwrap();
    memtable.put(b"b", b"2b", 4).unwrap();
    memtable.put(b"c", b"3", 3).unwrap();

    let mut iter = memtable.scan(
        Bound::Included(KeySlice::from_slice(b"a", u64::MAX)),
        Bound::Included(KeySlice::from_slice(b"b", 0)),
    );
    // versions of "b" surface newest first.
    let mut seen = Vec::new();
    while iter.is_valid() {
        seen.push((iter.key().key_ref().to_vec(), iter.txn()));
        iter.next().unwrap();
    }
    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), 1),
            (b"b".to_vec(), 4),
            (b"b".to_vec(), 2),
        ]
    );
}

#[test]
fn test_iterator_prev_and_seek() {
    let memtable = MemTable::create(0);
    for (key, txn) in [(b"a", 1u64), (b"b", 2), (b"c", 3), (b"d", 4)] {
        memtable.put(key, b"v", txn).unwrap();
    }

    let mut iter = memtable.iter();
    iter.next().unwrap();
    iter.next().unwrap();
    assert_eq!(iter.key().key_ref(), b"c");

    iter.prev().unwrap();
    assert_eq!(iter.key().key_ref(), b"b");
    iter.prev().unwrap();
    assert_eq!(iter.key().key_ref(), b"a");
    iter.prev().unwrap();
    assert!(!iter.is_valid());

    let mut iter = memtable.iter();
    iter.seek_to_key(KeySlice::from_slice(b"c", u64::MAX)).unwrap();
    assert_eq!(iter.key().key_ref(), b"c");
    iter.seek_to_last().unwrap();
    assert_eq!(iter.key().key_ref(), b"d");
    // forward again after walking backward
    iter.prev().unwrap();
    assert_eq!(iter.key().key_ref(), b"c");
    iter.next().unwrap();
    assert_eq!(iter.key().key_ref(), b"d");
}

#[test]
fn test_batch_and_flush_order() {
    use crate::entry::WriteBatchRecord;
    use crate::table::SsTableBuilder;

    let memtable = MemTable::create(0);
    memtable
        .batch(
            &[
                WriteBatchRecord::Put(b"k2".as_slice(), b"v2".as_slice()),
                WriteBatchRecord::Put(b"k1", b"v1"),
                WriteBatchRecord::Del(b"k3"),
            ],
            9,
        )
        .unwrap();

    let mut builder = SsTableBuilder::new(4096);
    memtable.flush(&mut builder).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let table = builder.build_for_test(dir.path().join("m.sst")).unwrap();
    assert_eq!(table.first_key().as_ref(), b"k1");
    assert_eq!(table.last_key().as_ref(), b"k3");
    assert_eq!(table.get(b"k3", 9).unwrap(), LookupResult::Deleted);
}
