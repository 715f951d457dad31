pub mod builder;
pub mod iterator;

use bytes::{Buf, Bytes};

use crate::entry::{LookupResult, TxnId, ValueKind};
use crate::error::{Error, Result};
use crate::key::KeySlice;

pub use builder::BlockBuilder;
pub use iterator::BlockIterator;

pub(crate) const SIZEOF_U32: usize = std::mem::size_of::<u32>();
pub(crate) const SIZEOF_U64: usize = std::mem::size_of::<u64>();

/// Offset-section entries are (start, length) pairs of u64.
pub(crate) const OFFSET_ENTRY_SIZE: usize = 2 * SIZEOF_U64;
/// Trailing extra info: num_entries and offset-section start.
pub(crate) const BLOCK_EXTRA_SIZE: usize = 2 * SIZEOF_U64;

/*
Block layout (little-endian):

DATA SECTION    : { data_entry }*
OFFSET SECTION  : { u64 start_offset, u64 length }*
EXTRA (16 B)    : u64 num_entries, u64 offset_section_start

data_entry      : u8 value_kind,
                  u32 key_len, key_bytes,
                  [u32 value_len, value_bytes]   // only if kind = Put
                  u64 txn_id
*/

/// A decoded, validated block. Entries are sorted by key ascending, txn
/// descending. Immutable once decoded; shared behind `Arc` by the block
/// cache and any iterators over it.
pub struct Block {
    data: Bytes,
    /// (start, length) of each data entry, parsed from the offset section.
    offsets: Vec<(usize, usize)>,
}

/// A borrowed view of one data entry.
#[derive(Debug)]
pub(crate) struct BlockEntry<'a> {
    pub key: KeySlice<'a>,
    pub kind: ValueKind,
    pub value: Option<&'a [u8]>,
}

impl Block {
    /// Decode and validate a raw block buffer. Every entry is bounds-checked
    /// here so that later accessors never fail.
    pub fn decode(raw: Bytes) -> Result<Block> {
        if raw.len() < BLOCK_EXTRA_SIZE {
            return Err(Error::CorruptBlock("shorter than extra section"));
        }
        let extra_start = raw.len() - BLOCK_EXTRA_SIZE;
        let mut extra = &raw[extra_start..];
        let num_entries = extra.get_u64_le() as usize;
        let offset_start = extra.get_u64_le() as usize;

        let offset_bytes = num_entries
            .checked_mul(OFFSET_ENTRY_SIZE)
            .ok_or(Error::CorruptBlock("entry count overflow"))?;
        if offset_start > extra_start || extra_start - offset_start != offset_bytes {
            return Err(Error::CorruptBlock("offset section mismatch"));
        }

        let mut offsets = Vec::with_capacity(num_entries);
        let mut offset_section = &raw[offset_start..extra_start];
        for _ in 0..num_entries {
            let start = offset_section.get_u64_le() as usize;
            let len = offset_section.get_u64_le() as usize;
            if start.checked_add(len).map_or(true, |end| end > offset_start) {
                return Err(Error::CorruptBlock("entry outside data section"));
            }
            Self::validate_entry(&raw[start..start + len])?;
            offsets.push((start, len));
        }

        Ok(Block { data: raw, offsets })
    }

    fn validate_entry(entry: &[u8]) -> Result<()> {
        let mut buf = entry;
        if buf.len() < 1 + SIZEOF_U32 {
            return Err(Error::CorruptBlock("truncated entry header"));
        }
        let kind = ValueKind::from_u8(buf.get_u8()).ok_or(Error::CorruptBlock("bad value kind"))?;
        let key_len = buf.get_u32_le() as usize;
        if buf.len() < key_len {
            return Err(Error::CorruptBlock("truncated key"));
        }
        buf.advance(key_len);
        if kind == ValueKind::Put {
            if buf.len() < SIZEOF_U32 {
                return Err(Error::CorruptBlock("truncated value length"));
            }
            let value_len = buf.get_u32_le() as usize;
            if buf.len() < value_len {
                return Err(Error::CorruptBlock("truncated value"));
            }
            buf.advance(value_len);
        }
        if buf.len() != SIZEOF_U64 {
            return Err(Error::CorruptBlock("entry length mismatch"));
        }
        Ok(())
    }

    pub fn num_entries(&self) -> usize {
        self.offsets.len()
    }

    /// Decode the entry at `idx`. Bounds were validated in `decode`.
    pub(crate) fn entry_at(&self, idx: usize) -> BlockEntry<'_> {
        let (start, len) = self.offsets[idx];
        let entry = &self.data[start..start + len];
        let mut buf = entry;
        let kind = ValueKind::from_u8(buf.get_u8()).expect("validated on decode");
        let key_len = buf.get_u32_le() as usize;
        let key = &buf[..key_len];
        buf.advance(key_len);
        let value = match kind {
            ValueKind::Put => {
                let value_len = buf.get_u32_le() as usize;
                let value = &buf[..value_len];
                buf.advance(value_len);
                Some(value)
            }
            ValueKind::Deleted => None,
        };
        let txn = buf.get_u64_le();
        BlockEntry {
            key: KeySlice::from_slice(key, txn),
            kind,
            value,
        }
    }

    /// Index of the first entry at or after `(key, txn)` in the block order
    /// (key ascending, txn descending). `num_entries()` if none.
    pub(crate) fn lower_bound(&self, key: &[u8], txn: TxnId) -> usize {
        let target = KeySlice::from_slice(key, txn);
        let mut left = 0;
        let mut right = self.offsets.len();
        while left < right {
            let mid = left + (right - left) / 2;
            if self.entry_at(mid).key < target {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        left
    }

    /// Point lookup: the newest version of `key` visible to `txn`.
    pub fn get(&self, key: &[u8], txn: TxnId) -> LookupResult {
        let idx = self.lower_bound(key, txn);
        if idx >= self.offsets.len() {
            return LookupResult::NotFound;
        }
        let entry = self.entry_at(idx);
        if entry.key.key_ref() != key {
            return LookupResult::NotFound;
        }
        match entry.kind {
            ValueKind::Put => {
                LookupResult::Put(self.data.slice_ref(entry.value.expect("put carries a value")))
            }
            ValueKind::Deleted => LookupResult::Deleted,
        }
    }
}
