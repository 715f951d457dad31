use bytes::{BufMut, Bytes};

use super::{BLOCK_EXTRA_SIZE, OFFSET_ENTRY_SIZE, SIZEOF_U32, SIZEOF_U64};
use crate::entry::{MAX_KEY_SIZE, MAX_VALUE_SIZE, ValueKind};
use crate::error::{Error, Result};
use crate::key::{KeySlice, KeyVec};

/// Builds one block. The table builder decides when the block is full by
/// polling `current_size`, then calls `finish` and `reset` to reuse the
/// buffers for the next block.
pub struct BlockBuilder {
    /// serialized data entries.
    data: Vec<u8>,
    /// (start, length) of each data entry.
    offsets: Vec<(u64, u64)>,
    /// last key added, for the ordering invariant.
    last_key: KeyVec,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            offsets: Vec::new(),
            last_key: KeyVec::new(),
        }
    }

    /// Append one entry. Entries must arrive in strictly ascending
    /// (key asc, txn desc) order; `value = None` writes a tombstone.
    pub fn add(&mut self, key: KeySlice, value: Option<&[u8]>) -> Result<()> {
        assert!(!key.is_empty(), "key must not be empty");
        if key.key_len() > MAX_KEY_SIZE {
            return Err(Error::KeyTooLarge(key.key_len()));
        }
        if let Some(value) = value {
            if value.len() > MAX_VALUE_SIZE {
                return Err(Error::ValueTooLarge(value.len()));
            }
        }
        if !self.last_key.is_empty() {
            assert!(
                key > self.last_key.as_key_slice(),
                "entries must be added in ascending order"
            );
        }

        let start = self.data.len() as u64;
        let kind = match value {
            Some(_) => ValueKind::Put,
            None => ValueKind::Deleted,
        };
        self.data.put_u8(kind as u8);
        self.data.put_u32_le(key.key_len() as u32);
        self.data.put_slice(key.key_ref());
        if let Some(value) = value {
            self.data.put_u32_le(value.len() as u32);
            self.data.put_slice(value);
        }
        self.data.put_u64_le(key.txn());
        self.offsets.push((start, self.data.len() as u64 - start));

        self.last_key.set_from_slice(key);
        Ok(())
    }

    /// Encoded size if the block were finished now.
    pub fn current_size(&self) -> usize {
        self.data.len() + self.offsets.len() * OFFSET_ENTRY_SIZE + BLOCK_EXTRA_SIZE
    }

    pub fn num_entries(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Encode data section, offset section, and extra info into one buffer.
    pub fn finish(&self) -> Bytes {
        assert!(!self.is_empty(), "block should not be empty");
        let mut buf =
            Vec::with_capacity(self.data.len() + self.offsets.len() * OFFSET_ENTRY_SIZE + BLOCK_EXTRA_SIZE);
        buf.put_slice(&self.data);
        for (start, len) in &self.offsets {
            buf.put_u64_le(*start);
            buf.put_u64_le(*len);
        }
        buf.put_u64_le(self.offsets.len() as u64);
        buf.put_u64_le(self.data.len() as u64);
        buf.into()
    }

    /// Clear all buffers so the builder can take the next block.
    pub fn reset(&mut self) {
        self.data.clear();
        self.offsets.clear();
        self.last_key = KeyVec::new();
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// keep the size arithmetic honest: one entry is kind + key_len + key +
// (value_len + value for puts) + txn.
pub(crate) fn encoded_entry_size(key_len: usize, value_len: Option<usize>) -> usize {
    1 + SIZEOF_U32 + key_len + value_len.map_or(0, |v| SIZEOF_U32 + v) + SIZEOF_U64
}
