use crate::iterators::merge_iterator::MergeIterator;
use crate::iterators::StorageIterator;
use crate::key::KeySlice;
use crate::memtable::{MemTable, MemTableIterator};

fn memtable_from(entries: &[(&[u8], Option<&[u8]>, u64)]) -> MemTable {
    let memtable = MemTable::create(0);
    for &(key, value, txn) in entries {
        match value {
            Some(value) => memtable.put(key, value, txn).unwrap(),
            None => memtable.delete(key, txn).unwrap(),
        }
    }
    memtable
}

fn drain(iter: &mut MergeIterator<MemTableIterator>) -> Vec<(Vec<u8>, u64, Option<Vec<u8>>)> {
    let mut out = Vec::new();
    while iter.is_valid() {
        out.push((
            iter.key().key_ref().to_vec(),
            iter.txn(),
            iter.value().map(|v| v.to_vec()),
        ));
        iter.next().unwrap();
    }
    out
}

#[test]
fn test_merge_interleaves_sorted_sources() {
    let m1 = memtable_from(&[(b"a", Some(b"1"), 1), (b"d", Some(b"4"), 1)]);
    let m2 = memtable_from(&[(b"b", Some(b"2"), 1), (b"e", Some(b"5"), 1)]);
    let m3 = memtable_from(&[(b"c", Some(b"3"), 1)]);

    let mut iter = MergeIterator::create(vec![
        Box::new(m1.iter()),
        Box::new(m2.iter()),
        Box::new(m3.iter()),
    ]);
    let keys: Vec<Vec<u8>> = drain(&mut iter).into_iter().map(|(k, _, _)| k).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]);
}

#[test]
fn test_merge_orders_versions_and_dedups_exact_duplicates() {
    // both sources carry key "k": newer source first on exact ties, and all
    // distinct versions surface txn-descending.
    let newer = memtable_from(&[(b"k", Some(b"new5"), 5), (b"k", Some(b"dup3"), 3)]);
    let older = memtable_from(&[(b"k", Some(b"old3"), 3), (b"k", Some(b"old1"), 1)]);

    let mut iter = MergeIterator::create(vec![Box::new(newer.iter()), Box::new(older.iter())]);
    let entries = drain(&mut iter);
    assert_eq!(
        entries,
        vec![
            (b"k".to_vec(), 5, Some(b"new5".to_vec())),
            // the (k,3) pair exists in both sources; the newer source wins
            // and the duplicate is swallowed.
            (b"k".to_vec(), 3, Some(b"dup3".to_vec())),
            (b"k".to_vec(), 1, Some(b"old1".to_vec())),
        ]
    );
}

#[test]
fn test_merge_propagates_tombstones() {
    let newer = memtable_from(&[(b"a", None, 4)]);
    let older = memtable_from(&[(b"a", Some(b"1"), 2)]);

    let mut iter = MergeIterator::create(vec![Box::new(newer.iter()), Box::new(older.iter())]);
    let entries = drain(&mut iter);
    // the tombstone is an entry like any other; collapsing is the
    // consumer's call.
    assert_eq!(entries[0], (b"a".to_vec(), 4, None));
    assert_eq!(entries[1], (b"a".to_vec(), 2, Some(b"1".to_vec())));
}

#[test]
fn test_merge_seek_and_direction_switch() {
    let m1 = memtable_from(&[(b"a", Some(b"1"), 1), (b"c", Some(b"3"), 1)]);
    let m2 = memtable_from(&[(b"b", Some(b"2"), 1), (b"d", Some(b"4"), 1)]);

    let mut iter = MergeIterator::create(vec![Box::new(m1.iter()), Box::new(m2.iter())]);
    iter.seek_to_key(KeySlice::from_slice(b"b", u64::MAX)).unwrap();
    assert_eq!(iter.key().key_ref(), b"b");

    iter.next().unwrap();
    assert_eq!(iter.key().key_ref(), b"c");

    // turn around, walk back to the front
    iter.prev().unwrap();
    assert_eq!(iter.key().key_ref(), b"b");
    iter.prev().unwrap();
    assert_eq!(iter.key().key_ref(), b"a");
    iter.prev().unwrap();
    assert!(!iter.is_valid());

    iter.seek_to_last().unwrap();
    assert_eq!(iter.key().key_ref(), b"d");
    iter.prev().unwrap();
    assert_eq!(iter.key().key_ref(), b"c");
    // and forward again across the seam
    iter.next().unwrap();
    assert_eq!(iter.key().key_ref(), b"d");
    iter.next().unwrap();
    assert!(!iter.is_valid());
}

#[test]
fn test_merge_handles_empty_sources() {
    let empty = MemTable::create(0);
    let full = memtable_from(&[(b"x", Some(b"1"), 1)]);

    let mut iter = MergeIterator::create(vec![Box::new(empty.iter()), Box::new(full.iter())]);
    assert!(iter.is_valid());
    assert_eq!(iter.key().key_ref(), b"x");
    iter.next().unwrap();
    assert!(!iter.is_valid());

    let mut none = MergeIterator::create(Vec::<Box<MemTableIterator>>::new());
    assert!(!none.is_valid());
    none.seek_to_first().unwrap();
    assert!(!none.is_valid());
}
