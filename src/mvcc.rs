pub mod txn;
pub mod watermark;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::entry::TxnId;

use self::watermark::Watermark;

/// Lifecycle of a transaction handle. `Unknown` is what you get for a
/// handle this process never issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnStatus {
    Active(TxnId),
    Committed,
    Aborted,
    Unknown,
}

/// Hands out commit ids and read snapshots, and tracks the oldest live
/// snapshot (the watermark) that compaction must keep history for.
pub struct TransactionManager {
    /// latest commit id plus the live-reader watermark, under one lock so a
    /// snapshot and its registration are atomic.
    ts: Mutex<(TxnId, Watermark)>,
    statuses: Mutex<HashMap<u64, TxnStatus>>,
    next_handle: AtomicU64,
}

impl TransactionManager {
    /// `init` is the highest commit id already durable on disk.
    pub fn new(init: TxnId) -> Self {
        Self {
            ts: Mutex::new((init, Watermark::new())),
            statuses: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn latest_commit(&self) -> TxnId {
        self.ts.lock().0
    }

    /// Allocate the next commit id. Callers hold the db write lock, so id
    /// order matches write order.
    pub(crate) fn allocate_commit(&self) -> TxnId {
        let mut ts = self.ts.lock();
        ts.0 += 1;
        ts.0
    }

    /// Fold an externally supplied commit id into the counter so later
    /// snapshots see it.
    pub(crate) fn observe_commit(&self, txn: TxnId) {
        let mut ts = self.ts.lock();
        ts.0 = ts.0.max(txn);
    }

    /// The oldest snapshot any live transaction can still read, or the
    /// latest commit when nothing is in flight. Versions at or below this
    /// are collapsible by compaction.
    pub fn min_live_txn(&self) -> TxnId {
        let ts = self.ts.lock();
        ts.1.watermark().unwrap_or(ts.0)
    }

    /// Take a read snapshot and register it with the watermark.
    pub(crate) fn register_reader(&self) -> TxnId {
        let mut ts = self.ts.lock();
        let read_txn = ts.0;
        ts.1.add_reader(read_txn);
        read_txn
    }

    pub(crate) fn unregister_reader(&self, read_txn: TxnId) {
        self.ts.lock().1.remove_reader(read_txn);
    }

    pub(crate) fn issue_handle(&self, snapshot: TxnId) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.statuses
            .lock()
            .insert(handle, TxnStatus::Active(snapshot));
        handle
    }

    pub(crate) fn set_status(&self, handle: u64, status: TxnStatus) {
        self.statuses.lock().insert(handle, status);
    }

    pub fn status(&self, handle: u64) -> TxnStatus {
        self.statuses
            .lock()
            .get(&handle)
            .copied()
            .unwrap_or(TxnStatus::Unknown)
    }

    pub fn live_snapshots(&self) -> usize {
        self.ts.lock().1.num_retained_snapshots()
    }
}
