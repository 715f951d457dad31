use bytes::Bytes;

/// Monotonically increasing transaction id. Id 0 is the implicit autocommit
/// transaction; the transaction manager hands out everything above it.
pub type TxnId = u64;

pub const AUTOCOMMIT_TXN: TxnId = 0;

/// Keys and values are limited to what a u32 length prefix can describe.
pub const MAX_KEY_SIZE: usize = u32::MAX as usize;
pub const MAX_VALUE_SIZE: usize = u32::MAX as usize;

/// On-disk tag of a data entry. The wire value is a single byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueKind {
    Put = 0,
    Deleted = 1,
}

impl ValueKind {
    pub fn from_u8(raw: u8) -> Option<ValueKind> {
        match raw {
            0 => Some(ValueKind::Put),
            1 => Some(ValueKind::Deleted),
            _ => None,
        }
    }
}

/// A single versioned record. `kind = Deleted` implies `value = None`,
/// `kind = Put` implies `value = Some`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: Bytes,
    pub kind: ValueKind,
    pub value: Option<Bytes>,
    pub txn: TxnId,
}

/// One record of a write batch.
pub enum WriteBatchRecord<T: AsRef<[u8]>> {
    Put(T, T),
    Del(T),
}

/// Outcome of a point lookup. `Put` and `Deleted` are conclusive; `NotFound`
/// tells the caller to keep probing older layers. `TooManyOpenFiles` is a
/// transient resource condition, not a logical miss.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupResult {
    Put(Bytes),
    Deleted,
    NotFound,
    TooManyOpenFiles,
}

impl LookupResult {
    /// A conclusive result stops the layered search.
    pub fn is_conclusive(&self) -> bool {
        !matches!(self, LookupResult::NotFound)
    }

    /// Collapse to the user-facing view: `Deleted` and `NotFound` are both
    /// "no value".
    pub fn into_value(self) -> Option<Bytes> {
        match self {
            LookupResult::Put(value) => Some(value),
            _ => None,
        }
    }
}
