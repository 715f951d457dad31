use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;

use super::{DbInner, DbState};
use crate::entry::{TxnId, ValueKind};
use crate::error::Result;
use crate::iterators::merge_iterator::MergeIterator;
use crate::iterators::StorageIterator;
use crate::key::KeySlice;
use crate::memtable::MemTableIterator;
use crate::table::SsTableIterator;
use crate::version::{SstMetadata, VersionRef};

/// Static dispatch across the cursor variants that can feed the merge.
pub enum LayerIterator {
    Mem(MemTableIterator),
    Table(SsTableIterator),
}

impl StorageIterator for LayerIterator {
    type KeyType<'a> = KeySlice<'a>;

    fn key(&self) -> KeySlice {
        match self {
            LayerIterator::Mem(iter) => iter.key(),
            LayerIterator::Table(iter) => iter.key(),
        }
    }

    fn value(&self) -> Option<&[u8]> {
        match self {
            LayerIterator::Mem(iter) => iter.value(),
            LayerIterator::Table(iter) => iter.value(),
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            LayerIterator::Mem(iter) => iter.kind(),
            LayerIterator::Table(iter) => iter.kind(),
        }
    }

    fn txn(&self) -> TxnId {
        match self {
            LayerIterator::Mem(iter) => iter.txn(),
            LayerIterator::Table(iter) => iter.txn(),
        }
    }

    fn is_valid(&self) -> bool {
        match self {
            LayerIterator::Mem(iter) => iter.is_valid(),
            LayerIterator::Table(iter) => iter.is_valid(),
        }
    }

    fn next(&mut self) -> Result<()> {
        match self {
            LayerIterator::Mem(iter) => iter.next(),
            LayerIterator::Table(iter) => iter.next(),
        }
    }

    fn prev(&mut self) -> Result<()> {
        match self {
            LayerIterator::Mem(iter) => iter.prev(),
            LayerIterator::Table(iter) => iter.prev(),
        }
    }

    fn seek_to_key(&mut self, key: KeySlice) -> Result<()> {
        match self {
            LayerIterator::Mem(iter) => iter.seek_to_key(key),
            LayerIterator::Table(iter) => iter.seek_to_key(key),
        }
    }

    fn seek_to_first(&mut self) -> Result<()> {
        match self {
            LayerIterator::Mem(iter) => iter.seek_to_first(),
            LayerIterator::Table(iter) => iter.seek_to_first(),
        }
    }

    fn seek_to_last(&mut self) -> Result<()> {
        match self {
            LayerIterator::Mem(iter) => iter.seek_to_last(),
            LayerIterator::Table(iter) => iter.seek_to_last(),
        }
    }
}

/// User-facing range cursor: walks the merge of every layer, keeps the
/// newest version visible to the snapshot per key, hides tombstones and
/// enforces the end bound. Holds the version pin so the files underneath
/// cannot vanish mid-scan.
pub struct DbIterator {
    inner: MergeIterator<LayerIterator>,
    end_bound: Bound<Bytes>,
    read_txn: TxnId,
    /// last user key emitted (or excluded by the begin bound).
    prev_key: Vec<u8>,
    valid: bool,
    _version: VersionRef,
}

impl DbIterator {
    fn new(
        inner: MergeIterator<LayerIterator>,
        end_bound: Bound<Bytes>,
        read_txn: TxnId,
        prev_key: Vec<u8>,
        version: VersionRef,
    ) -> Result<Self> {
        let mut iter = Self {
            inner,
            end_bound,
            read_txn,
            prev_key,
            valid: true,
            _version: version,
        };
        iter.settle()?;
        Ok(iter)
    }

    /// Advance until positioned on the newest visible, non-deleted version
    /// of a not-yet-emitted key inside the end bound.
    fn settle(&mut self) -> Result<()> {
        loop {
            if !self.inner.is_valid() {
                self.valid = false;
                return Ok(());
            }
            let user_key = self.inner.key().into_inner();
            let in_bound = match self.end_bound.as_ref() {
                Bound::Unbounded => true,
                Bound::Included(end) => user_key <= end.as_ref(),
                Bound::Excluded(end) => user_key < end.as_ref(),
            };
            if !in_bound {
                self.valid = false;
                return Ok(());
            }
            if self.inner.txn() > self.read_txn {
                // written after our snapshot.
                self.inner.next()?;
                continue;
            }
            if user_key == self.prev_key.as_slice() {
                // an older version of a key we already resolved.
                self.inner.next()?;
                continue;
            }
            self.prev_key = user_key.to_vec();
            if self.inner.kind() == ValueKind::Deleted {
                self.inner.next()?;
                continue;
            }
            self.valid = true;
            return Ok(());
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        self.inner.key().into_inner()
    }

    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        self.inner.value().expect("tombstones are skipped")
    }

    pub fn txn(&self) -> TxnId {
        self.inner.txn()
    }

    pub fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        self.inner.next()?;
        self.settle()
    }
}

fn memtable_lower(bound: Bound<&[u8]>) -> Bound<KeySlice<'_>> {
    match bound {
        // (key, MAX) sorts before every version of key.
        Bound::Included(key) => Bound::Included(KeySlice::from_slice(key, TxnId::MAX)),
        // (key, 0) sorts after every version of key.
        Bound::Excluded(key) => Bound::Excluded(KeySlice::from_slice(key, 0)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn memtable_upper(bound: Bound<&[u8]>) -> Bound<KeySlice<'_>> {
    match bound {
        Bound::Included(key) => Bound::Included(KeySlice::from_slice(key, 0)),
        Bound::Excluded(key) => Bound::Excluded(KeySlice::from_slice(key, TxnId::MAX)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn table_in_range(meta: &SstMetadata, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> bool {
    let below = match lower {
        Bound::Included(key) | Bound::Excluded(key) => meta.largest_key.as_ref() < key,
        Bound::Unbounded => false,
    };
    let above = match upper {
        Bound::Included(key) => meta.smallest_key.as_ref() > key,
        Bound::Excluded(key) => meta.smallest_key.as_ref() >= key,
        Bound::Unbounded => false,
    };
    !below && !above
}

/// Assemble the merge: memtable, immutables newest first, L0 newest first,
/// then each deeper level's overlapping files.
pub(crate) fn build_range_iterator(
    db: &Arc<DbInner>,
    snapshot: Arc<DbState>,
    version: VersionRef,
    lower: Bound<&[u8]>,
    upper: Bound<&[u8]>,
    read_txn: TxnId,
) -> Result<DbIterator> {
    let mut iters: Vec<Box<LayerIterator>> = Vec::new();

    iters.push(Box::new(LayerIterator::Mem(
        snapshot.memtable.scan(memtable_lower(lower), memtable_upper(upper)),
    )));
    for imm in snapshot.immutables.iter().rev() {
        iters.push(Box::new(LayerIterator::Mem(
            imm.scan(memtable_lower(lower), memtable_upper(upper)),
        )));
    }

    let seek_table = |meta: &SstMetadata| -> Result<SsTableIterator> {
        let table = db.version_manager().table_reader(meta.sst_id)?;
        match lower {
            Bound::Included(key) | Bound::Excluded(key) => {
                SsTableIterator::create_and_seek_to_key(table, KeySlice::from_slice(key, TxnId::MAX))
            }
            Bound::Unbounded => SsTableIterator::create_and_seek_to_first(table),
        }
    };

    let mut l0: Vec<&Arc<SstMetadata>> = version.levels()[0]
        .iter()
        .filter(|meta| table_in_range(meta, lower, upper))
        .collect();
    l0.sort_by(|a, b| b.sst_id.cmp(&a.sst_id));
    for meta in l0 {
        iters.push(Box::new(LayerIterator::Table(seek_table(meta)?)));
    }

    for level in 1..version.levels().len() {
        for meta in &version.levels()[level] {
            if table_in_range(meta, lower, upper) {
                iters.push(Box::new(LayerIterator::Table(seek_table(meta)?)));
            }
        }
    }

    // an excluded begin key is treated as already emitted, so the table
    // cursors parked on it get skipped uniformly.
    let prev_key = match lower {
        Bound::Excluded(key) => key.to_vec(),
        _ => Vec::new(),
    };

    DbIterator::new(
        MergeIterator::create(iters),
        match upper {
            Bound::Included(key) => Bound::Included(Bytes::copy_from_slice(key)),
            Bound::Excluded(key) => Bound::Excluded(Bytes::copy_from_slice(key)),
            Bound::Unbounded => Bound::Unbounded,
        },
        read_txn,
        prev_key,
        version,
    )
}
