pub mod builder;
pub mod iterator;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes};

use crate::block::Block;
use crate::cache::BlockCache;
use crate::entry::{LookupResult, TxnId};
use crate::error::{Error, Result};

pub use builder::SsTableBuilder;
pub use iterator::SsTableIterator;

/*
SST layout (little-endian):

BLOCK SECTION   : { block }*
BLOCK INDEX     : { u32 first_key_len, first_key,
                    u32 last_key_len,  last_key,
                    u64 block_offset,  u64 block_size }*
FOOTER (32 B)   : u64 index_offset, u64 index_length,
                  u64 min_txn,      u64 max_txn
*/

pub(crate) const FOOTER_SIZE: usize = 32;

/// One block-index record: the user-key range a block covers and where the
/// block lives in the file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub first_key: Bytes,
    pub last_key: Bytes,
    pub offset: u64,
    pub length: u64,
}

impl BlockIndexEntry {
    pub fn encode_index(entries: &[BlockIndexEntry], buf: &mut Vec<u8>) {
        for entry in entries {
            buf.put_u32_le(entry.first_key.len() as u32);
            buf.put_slice(&entry.first_key);
            buf.put_u32_le(entry.last_key.len() as u32);
            buf.put_slice(&entry.last_key);
            buf.put_u64_le(entry.offset);
            buf.put_u64_le(entry.length);
        }
    }

    pub fn decode_index(mut buf: &[u8]) -> Result<Vec<BlockIndexEntry>> {
        let mut entries = Vec::new();
        while buf.has_remaining() {
            if buf.remaining() < 4 {
                return Err(Error::CorruptFooter("truncated block index"));
            }
            let first_key_len = buf.get_u32_le() as usize;
            if buf.remaining() < first_key_len + 4 {
                return Err(Error::CorruptFooter("truncated block index"));
            }
            let first_key = buf.copy_to_bytes(first_key_len);
            let last_key_len = buf.get_u32_le() as usize;
            if buf.remaining() < last_key_len + 16 {
                return Err(Error::CorruptFooter("truncated block index"));
            }
            let last_key = buf.copy_to_bytes(last_key_len);
            let offset = buf.get_u64_le();
            let length = buf.get_u64_le();
            entries.push(BlockIndexEntry {
                first_key,
                last_key,
                offset,
                length,
            });
        }
        Ok(entries)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Footer {
    pub index_offset: u64,
    pub index_length: u64,
    pub min_txn: TxnId,
    pub max_txn: TxnId,
}

impl Footer {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u64_le(self.index_offset);
        buf.put_u64_le(self.index_length);
        buf.put_u64_le(self.min_txn);
        buf.put_u64_le(self.max_txn);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Footer> {
        if buf.len() != FOOTER_SIZE {
            return Err(Error::CorruptFooter("footer must be 32 bytes"));
        }
        Ok(Footer {
            index_offset: buf.get_u64_le(),
            index_length: buf.get_u64_le(),
            min_txn: buf.get_u64_le(),
            max_txn: buf.get_u64_le(),
        })
    }
}

/// A file handle supporting whole-buffer create and positioned reads.
pub struct FileObject(File, u64);

impl FileObject {
    pub fn create(path: &Path, data: Vec<u8>) -> Result<Self> {
        std::fs::write(path, &data)?;
        File::open(path)?.sync_all()?;
        let file = File::options()
            .read(true)
            .write(false)
            .open(path)
            .map_err(|e| Error::from_open(e, path))?;
        Ok(FileObject(file, data.len() as u64))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(false)
            .open(path)
            .map_err(|e| Error::from_open(e, path))?;
        let size = file.metadata()?.len();
        Ok(FileObject(file, size))
    }

    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        use std::os::unix::fs::FileExt;
        let mut data = vec![0; len as usize];
        self.0.read_exact_at(&mut data[..], offset)?;
        Ok(data)
    }

    pub fn size(&self) -> u64 {
        self.1
    }
}

/// An open, immutable SST: the footer and block index live in memory, data
/// blocks are fetched on demand through the block cache.
pub struct SsTable {
    pub(crate) file: FileObject,
    id: u64,
    pub(crate) block_index: Vec<BlockIndexEntry>,
    first_key: Bytes,
    last_key: Bytes,
    min_txn: TxnId,
    max_txn: TxnId,
    block_cache: Option<Arc<BlockCache>>,
}

impl SsTable {
    /// Open an SST: decode the footer from the file tail, then load the
    /// whole block index.
    pub fn open(id: u64, block_cache: Option<Arc<BlockCache>>, file: FileObject) -> Result<Self> {
        let len = file.size();
        if len < FOOTER_SIZE as u64 {
            return Err(Error::CorruptFooter("file shorter than footer"));
        }
        let raw_footer = file.read(len - FOOTER_SIZE as u64, FOOTER_SIZE as u64)?;
        let footer = Footer::decode(&raw_footer)?;
        if footer
            .index_offset
            .checked_add(footer.index_length)
            .map_or(true, |end| end != len - FOOTER_SIZE as u64)
        {
            return Err(Error::CorruptFooter("block index out of bounds"));
        }
        let raw_index = file.read(footer.index_offset, footer.index_length)?;
        let block_index = BlockIndexEntry::decode_index(&raw_index)?;
        let (first_key, last_key) = match (block_index.first(), block_index.last()) {
            (Some(first), Some(last)) => (first.first_key.clone(), last.last_key.clone()),
            _ => return Err(Error::CorruptFooter("empty block index")),
        };
        Ok(Self {
            file,
            id,
            block_index,
            first_key,
            last_key,
            min_txn: footer.min_txn,
            max_txn: footer.max_txn,
            block_cache,
        })
    }

    /// Read and decode the block at `block_idx` straight from the file.
    pub fn read_block(&self, block_idx: usize) -> Result<Arc<Block>> {
        let meta = &self.block_index[block_idx];
        let raw = self.file.read(meta.offset, meta.length)?;
        Ok(Arc::new(Block::decode(Bytes::from(raw))?))
    }

    /// Read a block through the block cache, loading on miss. The cache key
    /// is `(sst_id, block_offset)`.
    pub fn read_block_cached(&self, block_idx: usize) -> Result<Arc<Block>> {
        let Some(cache) = &self.block_cache else {
            return self.read_block(block_idx);
        };
        let cache_key = (self.id, self.block_index[block_idx].offset);
        if let Some(handle) = cache.get(&cache_key) {
            return Ok(handle.value().clone());
        }
        let block = self.read_block(block_idx)?;
        let handle = cache.insert(cache_key, block);
        Ok(handle.value().clone())
    }

    /// Index of the first block whose `last_key >= key`; `num_of_blocks()`
    /// if the key sorts after everything in the table.
    pub fn find_block_idx(&self, key: &[u8]) -> usize {
        self.block_index
            .partition_point(|meta| meta.last_key.as_ref() < key)
    }

    /// Point lookup. Versions of one user key never straddle a block
    /// boundary, so a single block probe is conclusive.
    pub fn get(&self, key: &[u8], txn: TxnId) -> Result<LookupResult> {
        let block_idx = self.find_block_idx(key);
        if block_idx >= self.num_of_blocks() {
            return Ok(LookupResult::NotFound);
        }
        let block = self.read_block_cached(block_idx)?;
        Ok(block.get(key, txn))
    }

    pub fn first_key(&self) -> &Bytes {
        &self.first_key
    }

    pub fn last_key(&self) -> &Bytes {
        &self.last_key
    }

    pub fn num_of_blocks(&self) -> usize {
        self.block_index.len()
    }

    pub fn table_size(&self) -> u64 {
        self.file.1
    }

    pub fn sst_id(&self) -> u64 {
        self.id
    }

    pub fn min_txn(&self) -> TxnId {
        self.min_txn
    }

    pub fn max_txn(&self) -> TxnId {
        self.max_txn
    }
}
