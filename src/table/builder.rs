use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use super::{BlockIndexEntry, FileObject, Footer, SsTable};
use crate::block::BlockBuilder;
use crate::cache::BlockCache;
use crate::entry::TxnId;
use crate::error::Result;
use crate::key::KeySlice;

/// Streams sorted entries into a multi-block SST file. A block is cut once
/// it reaches `block_size`, except that all versions of one user key always
/// stay inside a single block.
pub struct SsTableBuilder {
    builder: BlockBuilder,
    block_size: usize,
    // encoded blocks so far.
    data: Vec<u8>,
    index: Vec<BlockIndexEntry>,
    // key range of the block in progress.
    block_first_key: Vec<u8>,
    block_last_key: Vec<u8>,
    // key range of the whole table.
    first_key: Vec<u8>,
    last_key: Vec<u8>,
    min_txn: TxnId,
    max_txn: TxnId,
}

impl SsTableBuilder {
    pub fn new(block_size: usize) -> Self {
        Self {
            builder: BlockBuilder::new(),
            block_size,
            data: Vec::new(),
            index: Vec::new(),
            block_first_key: Vec::new(),
            block_last_key: Vec::new(),
            first_key: Vec::new(),
            last_key: Vec::new(),
            min_txn: TxnId::MAX,
            max_txn: 0,
        }
    }

    /// Append one entry. Entries must arrive in (key asc, txn desc) order.
    pub fn add(&mut self, key: KeySlice, value: Option<&[u8]>) -> Result<()> {
        let same_user_key = key.key_ref() == self.last_key.as_slice();
        if !self.builder.is_empty()
            && self.builder.current_size() >= self.block_size
            && !same_user_key
        {
            self.finish_block();
        }

        self.builder.add(key, value)?;

        if self.first_key.is_empty() {
            self.first_key = key.key_ref().to_vec();
        }
        if self.block_first_key.is_empty() {
            self.block_first_key = key.key_ref().to_vec();
        }
        self.block_last_key.clear();
        self.block_last_key.extend_from_slice(key.key_ref());
        self.last_key.clear();
        self.last_key.extend_from_slice(key.key_ref());
        self.min_txn = self.min_txn.min(key.txn());
        self.max_txn = self.max_txn.max(key.txn());
        Ok(())
    }

    /// Bytes the finished file would take, ignoring index and footer. Used
    /// by compaction to decide when to cut an output file.
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.builder.current_size()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.builder.is_empty()
    }

    fn finish_block(&mut self) {
        if self.builder.is_empty() {
            return;
        }
        let encoded = self.builder.finish();
        self.index.push(BlockIndexEntry {
            first_key: Bytes::from(std::mem::take(&mut self.block_first_key)),
            last_key: Bytes::from(std::mem::take(&mut self.block_last_key)),
            offset: self.data.len() as u64,
            length: encoded.len() as u64,
        });
        self.data.extend_from_slice(&encoded);
        self.builder.reset();
    }

    /// Flush the residual block, write index and footer, fsync. The file is
    /// immutable afterwards.
    pub fn build(
        mut self,
        id: u64,
        block_cache: Option<Arc<BlockCache>>,
        path: impl AsRef<Path>,
    ) -> Result<SsTable> {
        self.finish_block();
        assert!(!self.index.is_empty(), "cannot build an empty table");

        let mut buf = self.data;
        let index_offset = buf.len() as u64;
        BlockIndexEntry::encode_index(&self.index, &mut buf);
        let index_length = buf.len() as u64 - index_offset;
        Footer {
            index_offset,
            index_length,
            min_txn: self.min_txn,
            max_txn: self.max_txn,
        }
        .encode(&mut buf);

        let file = FileObject::create(path.as_ref(), buf)?;
        Ok(SsTable {
            file,
            id,
            first_key: self.index.first().expect("non-empty index").first_key.clone(),
            last_key: self.index.last().expect("non-empty index").last_key.clone(),
            block_index: self.index,
            min_txn: self.min_txn,
            max_txn: self.max_txn,
            block_cache,
        })
    }

    #[cfg(test)]
    pub(crate) fn build_for_test(self, path: impl AsRef<Path>) -> Result<SsTable> {
        self.build(0, None, path)
    }
}
