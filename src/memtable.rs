use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;
use ouroboros::self_referencing;

use crate::block::builder::encoded_entry_size;
use crate::entry::{LookupResult, TxnId, ValueKind, WriteBatchRecord, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::error::{Error, Result};
use crate::iterators::StorageIterator;
use crate::key::{KeyBytes, KeySlice};
use crate::table::SsTableBuilder;

/// Create a bound of `KeyBytes` from a bound of `KeySlice`.
pub(crate) fn map_key_bound(bound: Bound<KeySlice>) -> Bound<KeyBytes> {
    match bound {
        Bound::Included(x) => Bound::Included(x.to_key_bytes()),
        Bound::Excluded(x) => Bound::Excluded(x.to_key_bytes()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// The mutable in-memory table: a skiplist of (key, txn) to value-or-
/// tombstone. One writer under the db write lock, any number of readers.
pub struct MemTable {
    pub(crate) map: Arc<SkipMap<KeyBytes, Option<Bytes>>>,
    id: usize,
    approximate_size: Arc<AtomicUsize>,
}

impl MemTable {
    pub fn create(id: usize) -> Self {
        Self {
            id,
            map: Arc::new(SkipMap::new()),
            approximate_size: Arc::new(AtomicUsize::new(0)),
        }
    }

    /*----------------CRUD API and data manipulation------------------*/

    /// Latest version of `key` visible to `txn`. Thanks to the txn-descending
    /// key order, that is the first entry at or after `(key, txn)`.
    pub fn get(&self, key: &[u8], txn: TxnId) -> LookupResult {
        let target = KeyBytes::from_bytes(Bytes::copy_from_slice(key), txn);
        let Some(entry) = self.map.lower_bound(Bound::Included(&target)) else {
            return LookupResult::NotFound;
        };
        if entry.key().key_ref() != key {
            return LookupResult::NotFound;
        }
        match entry.value() {
            Some(value) => LookupResult::Put(value.clone()),
            None => LookupResult::Deleted,
        }
    }

    pub fn put(&self, key: &[u8], value: &[u8], txn: TxnId) -> Result<()> {
        self.write(key, Some(Bytes::copy_from_slice(value)), txn)
    }

    /// A delete is a put of a tombstone.
    pub fn delete(&self, key: &[u8], txn: TxnId) -> Result<()> {
        self.write(key, None, txn)
    }

    pub fn batch<T: AsRef<[u8]>>(&self, records: &[WriteBatchRecord<T>], txn: TxnId) -> Result<()> {
        for record in records {
            match record {
                WriteBatchRecord::Put(key, value) => {
                    self.put(key.as_ref(), value.as_ref(), txn)?
                }
                WriteBatchRecord::Del(key) => self.delete(key.as_ref(), txn)?,
            }
        }
        Ok(())
    }

    fn write(&self, key: &[u8], value: Option<Bytes>, txn: TxnId) -> Result<()> {
        assert!(!key.is_empty(), "key must not be empty");
        if key.len() > MAX_KEY_SIZE {
            return Err(Error::KeyTooLarge(key.len()));
        }
        if let Some(value) = &value {
            if value.len() > MAX_VALUE_SIZE {
                return Err(Error::ValueTooLarge(value.len()));
            }
        }
        let entry_size = encoded_entry_size(key.len(), value.as_ref().map(|v| v.len()));
        self.map.insert(
            KeyBytes::from_bytes(Bytes::copy_from_slice(key), txn),
            value,
        );
        self.approximate_size.fetch_add(entry_size, Ordering::Relaxed);
        Ok(())
    }

    pub fn scan(&self, lower: Bound<KeySlice>, upper: Bound<KeySlice>) -> MemTableIterator {
        MemTableIterator::create(self.map.clone(), map_key_bound(lower), map_key_bound(upper))
    }

    pub fn iter(&self) -> MemTableIterator {
        MemTableIterator::create(self.map.clone(), Bound::Unbounded, Bound::Unbounded)
    }

    /*----------------flush----------------------------------------*/

    /// Stream every entry, already in (key asc, txn desc) order, into an
    /// SST builder.
    pub fn flush(&self, builder: &mut SsTableBuilder) -> Result<()> {
        for entry in self.map.iter() {
            builder.add(entry.key().as_key_slice(), entry.value().as_deref())?;
        }
        Ok(())
    }

    /*-----------------util----------------------------------------*/

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Sum of encoded entry sizes, maintained on write. Drives rotation.
    pub fn byte_size(&self) -> usize {
        self.approximate_size.load(Ordering::Relaxed)
    }
}

type SkipMapRangeIter<'a> = crossbeam_skiplist::map::Range<
    'a,
    KeyBytes,
    (Bound<KeyBytes>, Bound<KeyBytes>),
    KeyBytes,
    Option<Bytes>,
>;

/// Cursor over a memtable range. Forward motion walks the live range
/// directly; direction changes and seeks rebuild the range against the
/// original bounds, anchored at the current key.
#[self_referencing]
pub struct MemTableIterator {
    map: Arc<SkipMap<KeyBytes, Option<Bytes>>>,
    // bounds the cursor was created with; rebuilds never widen past these.
    lower: Bound<KeyBytes>,
    upper: Bound<KeyBytes>,
    backward: bool,

    #[borrows(map)]
    #[not_covariant]
    iter: SkipMapRangeIter<'this>,
    item: (KeyBytes, Option<Bytes>),
}

impl MemTableIterator {
    pub(crate) fn create(
        map: Arc<SkipMap<KeyBytes, Option<Bytes>>>,
        lower: Bound<KeyBytes>,
        upper: Bound<KeyBytes>,
    ) -> Self {
        Self::make(map, lower.clone(), upper.clone(), lower, upper, false)
    }

    /// Build a cursor remembering (`lower`, `upper`) while iterating the
    /// effective range (`range_lower`, `range_upper`), primed on its first
    /// entry from the chosen end.
    fn make(
        map: Arc<SkipMap<KeyBytes, Option<Bytes>>>,
        lower: Bound<KeyBytes>,
        upper: Bound<KeyBytes>,
        range_lower: Bound<KeyBytes>,
        range_upper: Bound<KeyBytes>,
        backward: bool,
    ) -> Self {
        let mut iter = MemTableIteratorBuilder {
            map,
            lower,
            upper,
            backward,
            iter_builder: |map| map.range((range_lower, range_upper)),
            item: (KeyBytes::new(), None),
        }
        .build();
        iter.advance();
        iter
    }

    fn entry_to_item(entry: Option<Entry<'_, KeyBytes, Option<Bytes>>>) -> (KeyBytes, Option<Bytes>) {
        entry
            .map(|x| (x.key().clone(), x.value().clone()))
            .unwrap_or_else(|| (KeyBytes::new(), None))
    }

    fn advance(&mut self) {
        let backward = *self.borrow_backward();
        let entry = self.with_iter_mut(|iter| {
            Self::entry_to_item(if backward { iter.next_back() } else { iter.next() })
        });
        self.with_mut(|x| *x.item = entry);
    }

    /// Replace self with a cursor over a narrowed range in the given
    /// direction. The original bounds carry over unchanged.
    fn rebuild(&mut self, range_lower: Bound<KeyBytes>, range_upper: Bound<KeyBytes>, backward: bool) {
        let map = self.borrow_map().clone();
        let lower = self.borrow_lower().clone();
        let upper = self.borrow_upper().clone();
        *self = Self::make(map, lower, upper, range_lower, range_upper, backward);
    }

    fn current_key(&self) -> KeyBytes {
        self.borrow_item().0.clone()
    }
}

fn tighter_lower(orig: Bound<KeyBytes>, seek: KeyBytes) -> Bound<KeyBytes> {
    match &orig {
        Bound::Unbounded => Bound::Included(seek),
        Bound::Included(k) | Bound::Excluded(k) => {
            if *k > seek {
                orig
            } else {
                Bound::Included(seek)
            }
        }
    }
}

impl StorageIterator for MemTableIterator {
    type KeyType<'a> = KeySlice<'a>;

    fn key(&self) -> KeySlice {
        self.borrow_item().0.as_key_slice()
    }

    fn value(&self) -> Option<&[u8]> {
        self.borrow_item().1.as_deref()
    }

    fn kind(&self) -> ValueKind {
        match self.borrow_item().1 {
            Some(_) => ValueKind::Put,
            None => ValueKind::Deleted,
        }
    }

    fn txn(&self) -> TxnId {
        self.borrow_item().0.txn()
    }

    fn is_valid(&self) -> bool {
        !self.borrow_item().0.is_empty()
    }

    fn next(&mut self) -> Result<()> {
        if *self.borrow_backward() {
            let cur = self.current_key();
            let upper = self.borrow_upper().clone();
            self.rebuild(Bound::Excluded(cur), upper, false);
        } else {
            self.advance();
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if *self.borrow_backward() {
            self.advance();
        } else {
            let cur = self.current_key();
            let lower = self.borrow_lower().clone();
            self.rebuild(lower, Bound::Excluded(cur), true);
        }
        Ok(())
    }

    fn seek_to_key(&mut self, key: KeySlice) -> Result<()> {
        let lower = tighter_lower(self.borrow_lower().clone(), key.to_key_bytes());
        let upper = self.borrow_upper().clone();
        self.rebuild(lower, upper, false);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let lower = self.borrow_lower().clone();
        let upper = self.borrow_upper().clone();
        self.rebuild(lower, upper, false);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let lower = self.borrow_lower().clone();
        let upper = self.borrow_upper().clone();
        self.rebuild(lower, upper, true);
        Ok(())
    }
}
