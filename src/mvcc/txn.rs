use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use super::TxnStatus;
use crate::db::DbInner;
use crate::entry::{LookupResult, TxnId, WriteBatchRecord};
use crate::error::{Error, Result};

/// A read-snapshot transaction with buffered writes. Reads see the snapshot
/// plus the transaction's own uncommitted writes; `commit` publishes the
/// buffer under a fresh commit id, `abort` throws it away. A dropped
/// transaction aborts.
pub struct Transaction {
    pub(crate) read_txn: TxnId,
    pub(crate) handle: u64,
    pub(crate) db: Arc<DbInner>,
    /// uncommitted writes; `None` is a buffered delete.
    pub(crate) local: SkipMap<Bytes, Option<Bytes>>,
    pub(crate) finished: AtomicBool,
}

impl Transaction {
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        assert!(
            !self.finished.load(Ordering::SeqCst),
            "cannot operate on a finished transaction"
        );
        if let Some(entry) = self.local.get(key) {
            return Ok(entry.value().clone());
        }
        match self.db.get_with_txn(key, self.read_txn)? {
            LookupResult::Put(value) => Ok(Some(value)),
            LookupResult::TooManyOpenFiles => Err(Error::TooManyOpenFiles),
            LookupResult::Deleted | LookupResult::NotFound => Ok(None),
        }
    }

    pub fn put(&self, key: &[u8], value: &[u8]) {
        assert!(
            !self.finished.load(Ordering::SeqCst),
            "cannot operate on a finished transaction"
        );
        self.local.insert(
            Bytes::copy_from_slice(key),
            Some(Bytes::copy_from_slice(value)),
        );
    }

    pub fn delete(&self, key: &[u8]) {
        assert!(
            !self.finished.load(Ordering::SeqCst),
            "cannot operate on a finished transaction"
        );
        self.local.insert(Bytes::copy_from_slice(key), None);
    }

    pub fn commit(&self) -> Result<()> {
        assert!(
            !self.finished.swap(true, Ordering::SeqCst),
            "transaction committed or aborted twice"
        );
        let records: Vec<WriteBatchRecord<Bytes>> = self
            .local
            .iter()
            .map(|entry| match entry.value() {
                Some(value) => WriteBatchRecord::Put(entry.key().clone(), value.clone()),
                None => WriteBatchRecord::Del(entry.key().clone()),
            })
            .collect();
        self.db.commit_transaction(self.handle, &records)?;
        self.db.mvcc().unregister_reader(self.read_txn);
        Ok(())
    }

    pub fn abort(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            self.db.mvcc().set_status(self.handle, TxnStatus::Aborted);
            self.db.mvcc().unregister_reader(self.read_txn);
        }
    }

    pub fn read_txn(&self) -> TxnId {
        self.read_txn
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // an unfinished transaction aborts on the way out.
        self.abort();
    }
}
