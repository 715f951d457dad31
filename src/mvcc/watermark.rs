use std::collections::BTreeMap;

use crate::entry::TxnId;

/// Tracks which read snapshots are still referenced, and by how many
/// readers each.
pub struct Watermark {
    readers: BTreeMap<TxnId, usize>,
}

impl Watermark {
    pub fn new() -> Self {
        Self {
            readers: BTreeMap::new(),
        }
    }

    /// A transaction took a snapshot at `txn`.
    pub fn add_reader(&mut self, txn: TxnId) {
        *self.readers.entry(txn).or_default() += 1;
    }

    /// A transaction committed or aborted; forget its snapshot once the
    /// last reader at that id is gone.
    pub fn remove_reader(&mut self, txn: TxnId) {
        let count = self
            .readers
            .get_mut(&txn)
            .expect("removing a reader that was never added");
        *count -= 1;
        if *count == 0 {
            self.readers.remove(&txn);
        }
    }

    /// The lowest live snapshot, `None` when no transaction is in flight.
    pub fn watermark(&self) -> Option<TxnId> {
        self.readers.first_key_value().map(|(txn, _)| *txn)
    }

    pub fn num_retained_snapshots(&self) -> usize {
        self.readers.len()
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::new()
    }
}
