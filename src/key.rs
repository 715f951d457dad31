use std::cmp::{self, Reverse};
use std::fmt;

use bytes::Bytes;

use crate::entry::TxnId;

/// A user key paired with the transaction id that wrote it. All on-disk and
/// in-memory orderings are over this pair: key bytes ascending, txn
/// descending, so the newest version of a key sorts first.
pub struct Key<T: AsRef<[u8]>>(T, TxnId);

// set alias for KeySlice(borrowing) and KeyVec(ownership).
pub type KeySlice<'a> = Key<&'a [u8]>;
pub type KeyVec = Key<Vec<u8>>;
pub type KeyBytes = Key<Bytes>;

impl<T: AsRef<[u8]>> Key<T> {
    pub fn key_ref(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn txn(&self) -> TxnId {
        self.1
    }

    pub fn key_len(&self) -> usize {
        self.0.as_ref().len()
    }

    /// Key bytes plus the 8-byte txn suffix, as accounted on disk.
    pub fn raw_len(&self) -> usize {
        self.key_len() + std::mem::size_of::<TxnId>()
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_ref().is_empty()
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<'a> KeySlice<'a> {
    pub fn from_slice(slice: &'a [u8], txn: TxnId) -> Self {
        Self(slice, txn)
    }

    pub fn to_key_vec(self) -> KeyVec {
        Key(self.0.to_vec(), self.1)
    }

    pub fn to_key_bytes(self) -> KeyBytes {
        Key(Bytes::copy_from_slice(self.0), self.1)
    }
}

impl KeyVec {
    pub fn new() -> Self {
        Self(Vec::new(), 0)
    }

    pub fn from_vec(key: Vec<u8>, txn: TxnId) -> Self {
        Self(key, txn)
    }

    pub fn set_from_slice(&mut self, key: KeySlice) {
        self.0.clear();
        self.0.extend_from_slice(key.key_ref());
        self.1 = key.txn();
    }

    pub fn as_key_slice(&self) -> KeySlice {
        Key(&self.0, self.1)
    }

    pub fn into_key_bytes(self) -> KeyBytes {
        Key(self.0.into(), self.1)
    }
}

impl Default for KeyVec {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyBytes {
    pub fn new() -> Self {
        Self(Bytes::new(), 0)
    }

    pub fn from_bytes(key: Bytes, txn: TxnId) -> Self {
        Self(key, txn)
    }

    pub fn as_key_slice(&self) -> KeySlice {
        Key(&self.0, self.1)
    }

    pub fn key_bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl Default for KeyBytes {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: AsRef<[u8]> + Clone> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone(), self.1)
    }
}

impl<T: AsRef<[u8]> + Copy> Copy for Key<T> {}

impl<T: AsRef<[u8]>> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

impl<T: AsRef<[u8]>> Eq for Key<T> {}

impl<T: AsRef<[u8]>> PartialOrd for Key<T> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: AsRef<[u8]>> Ord for Key<T> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        (self.0.as_ref(), Reverse(self.1)).cmp(&(other.0.as_ref(), Reverse(other.1)))
    }
}

impl<T: AsRef<[u8]>> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.0.as_ref(), self.1)
    }
}
