pub mod merge_iterator;

use crate::entry::{TxnId, ValueKind};
use crate::error::Result;
use crate::key::KeySlice;

/// The cursor contract shared by every layer: memtable, block, table, and
/// the k-way merge. A cursor is positioned on an entry while `is_valid`;
/// calling accessors or movement on an invalid cursor is a caller bug.
pub trait StorageIterator {
    // keys may borrow from the iterator itself.
    type KeyType<'a>: PartialEq + Eq + PartialOrd + Ord
    where
        Self: 'a;

    /// current key (user key + txn).
    fn key(&self) -> Self::KeyType<'_>;

    /// current value; `None` for tombstones.
    fn value(&self) -> Option<&[u8]>;

    fn kind(&self) -> ValueKind;

    fn txn(&self) -> TxnId;

    fn is_valid(&self) -> bool;

    fn next(&mut self) -> Result<()>;

    fn prev(&mut self) -> Result<()>;

    /// Position at the first entry >= `key` in (key asc, txn desc) order.
    fn seek_to_key(&mut self, key: KeySlice) -> Result<()>;

    fn seek_to_first(&mut self) -> Result<()>;

    fn seek_to_last(&mut self) -> Result<()>;

    /// Number of underlying active sub-iterators.
    fn number_of_iterators(&self) -> usize {
        1
    }
}
