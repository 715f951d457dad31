use std::sync::Arc;

use super::Block;
use crate::entry::{TxnId, ValueKind};
use crate::error::Result;
use crate::iterators::StorageIterator;
use crate::key::KeySlice;

/// Cursor over a decoded block. Valid while `idx < num_entries`; stepping
/// past either end leaves the iterator invalid.
pub struct BlockIterator {
    block: Arc<Block>,
    idx: usize,
}

impl BlockIterator {
    fn new(block: Arc<Block>) -> Self {
        Self { block, idx: 0 }
    }

    pub fn create_and_seek_to_first(block: Arc<Block>) -> Self {
        let mut iter = Self::new(block);
        iter.seek_first();
        iter
    }

    pub fn create_and_seek_to_key(block: Arc<Block>, key: KeySlice) -> Self {
        let mut iter = Self::new(block);
        iter.seek_key(key);
        iter
    }

    pub fn seek_first(&mut self) {
        self.idx = 0;
    }

    pub fn seek_last(&mut self) {
        self.idx = self.block.num_entries().saturating_sub(1);
    }

    /// First entry >= `key` in (key asc, txn desc) order.
    pub fn seek_key(&mut self, key: KeySlice) {
        self.idx = self.block.lower_bound(key.key_ref(), key.txn());
    }

    pub fn step_forward(&mut self) {
        self.idx += 1;
    }

    /// Park the cursor past the last entry (invalid, recoverable by `prev`).
    pub(crate) fn seek_past_end(&mut self) {
        self.idx = self.block.num_entries();
    }

    pub fn step_back(&mut self) {
        // stepping before the front invalidates the cursor.
        if self.idx == 0 {
            self.idx = self.block.num_entries();
        } else {
            self.idx -= 1;
        }
    }
}

impl StorageIterator for BlockIterator {
    type KeyType<'a> = KeySlice<'a>;

    fn key(&self) -> KeySlice {
        self.block.entry_at(self.idx).key
    }

    fn value(&self) -> Option<&[u8]> {
        self.block.entry_at(self.idx).value
    }

    fn kind(&self) -> ValueKind {
        self.block.entry_at(self.idx).kind
    }

    fn txn(&self) -> TxnId {
        self.block.entry_at(self.idx).key.txn()
    }

    fn is_valid(&self) -> bool {
        self.idx < self.block.num_entries()
    }

    fn next(&mut self) -> Result<()> {
        self.step_forward();
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        self.step_back();
        Ok(())
    }

    fn seek_to_key(&mut self, key: KeySlice) -> Result<()> {
        self.seek_key(key);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.seek_first();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.seek_last();
        Ok(())
    }
}
