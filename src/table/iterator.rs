use std::sync::Arc;

use super::SsTable;
use crate::block::BlockIterator;
use crate::entry::{TxnId, ValueKind};
use crate::error::Result;
use crate::iterators::StorageIterator;
use crate::key::KeySlice;

/// Cursor over a whole SST. Walks the block index and lazily instantiates
/// block iterators through the block cache.
pub struct SsTableIterator {
    table: Arc<SsTable>,
    block_iter: BlockIterator,
    block_idx: usize,
}

impl SsTableIterator {
    pub fn create_and_seek_to_first(table: Arc<SsTable>) -> Result<Self> {
        let (block_idx, block_iter) = Self::seek_to_first_inner(&table)?;
        Ok(Self {
            block_iter,
            block_idx,
            table,
        })
    }

    fn seek_to_first_inner(table: &Arc<SsTable>) -> Result<(usize, BlockIterator)> {
        Ok((
            0,
            BlockIterator::create_and_seek_to_first(table.read_block_cached(0)?),
        ))
    }

    pub fn create_and_seek_to_key(table: Arc<SsTable>, key: KeySlice) -> Result<Self> {
        let (block_idx, block_iter) = Self::seek_to_key_inner(&table, key)?;
        Ok(Self {
            block_idx,
            block_iter,
            table,
        })
    }

    fn seek_to_key_inner(table: &Arc<SsTable>, key: KeySlice) -> Result<(usize, BlockIterator)> {
        let mut block_idx = table.find_block_idx(key.key_ref());
        if block_idx >= table.num_of_blocks() {
            // past the last block, leave an exhausted cursor on the tail.
            let mut iter = BlockIterator::create_and_seek_to_first(
                table.read_block_cached(table.num_of_blocks() - 1)?,
            );
            iter.seek_past_end();
            return Ok((table.num_of_blocks() - 1, iter));
        }
        let mut block_iter =
            BlockIterator::create_and_seek_to_key(table.read_block_cached(block_idx)?, key);
        if !block_iter.is_valid() {
            block_idx += 1;
            if block_idx < table.num_of_blocks() {
                block_iter =
                    BlockIterator::create_and_seek_to_first(table.read_block_cached(block_idx)?);
            }
        }
        Ok((block_idx, block_iter))
    }

    fn seek_to_last_inner(table: &Arc<SsTable>) -> Result<(usize, BlockIterator)> {
        let block_idx = table.num_of_blocks() - 1;
        let mut block_iter = BlockIterator::create_and_seek_to_first(table.read_block_cached(block_idx)?);
        block_iter.seek_last();
        Ok((block_idx, block_iter))
    }
}

impl StorageIterator for SsTableIterator {
    type KeyType<'a> = KeySlice<'a>;

    fn key(&self) -> KeySlice {
        self.block_iter.key()
    }

    fn value(&self) -> Option<&[u8]> {
        self.block_iter.value()
    }

    fn kind(&self) -> ValueKind {
        self.block_iter.kind()
    }

    fn txn(&self) -> TxnId {
        self.block_iter.txn()
    }

    fn is_valid(&self) -> bool {
        self.block_iter.is_valid()
    }

    fn next(&mut self) -> Result<()> {
        self.block_iter.step_forward();
        if !self.block_iter.is_valid() {
            self.block_idx += 1;
            if self.block_idx < self.table.num_of_blocks() {
                self.block_iter = BlockIterator::create_and_seek_to_first(
                    self.table.read_block_cached(self.block_idx)?,
                );
            }
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if self.block_idx >= self.table.num_of_blocks() {
            // exhausted forward; the cursor still sits past the end of the
            // tail block.
            self.block_idx = self.table.num_of_blocks() - 1;
        }
        self.block_iter.step_back();
        if !self.block_iter.is_valid() {
            if self.block_idx == 0 {
                return Ok(());
            }
            self.block_idx -= 1;
            let mut block_iter = BlockIterator::create_and_seek_to_first(
                self.table.read_block_cached(self.block_idx)?,
            );
            block_iter.seek_last();
            self.block_iter = block_iter;
        }
        Ok(())
    }

    fn seek_to_key(&mut self, key: KeySlice) -> Result<()> {
        let (block_idx, block_iter) = Self::seek_to_key_inner(&self.table, key)?;
        self.block_idx = block_idx;
        self.block_iter = block_iter;
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let (block_idx, block_iter) = Self::seek_to_first_inner(&self.table)?;
        self.block_idx = block_idx;
        self.block_iter = block_iter;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let (block_idx, block_iter) = Self::seek_to_last_inner(&self.table)?;
        self.block_idx = block_idx;
        self.block_iter = block_iter;
        Ok(())
    }
}
