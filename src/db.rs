pub mod iterator;

use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::unbounded;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tracing::{error, info, warn};

use crate::cache::{BlockCache, TableCache};
use crate::compact::CompactionEngine;
use crate::config::Config;
use crate::entry::{LookupResult, TxnId, WriteBatchRecord};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::mvcc::txn::Transaction;
use crate::mvcc::{TransactionManager, TxnStatus};
use crate::version::manager::sst_path;
use crate::version::{GcTask, VersionEdit, VersionManager};

pub use iterator::DbIterator;

/// snapshot of the in-memory write path: the mutable memtable plus the
/// frozen ones awaiting flush, oldest first.
#[derive(Clone)]
pub(crate) struct DbState {
    pub memtable: Arc<MemTable>,
    pub immutables: Vec<Arc<MemTable>>,
}

/// The orchestrator: owns the write path, schedules flushes and
/// compactions, and wires the version manager, caches, mvcc and worker
/// pool together.
pub struct DbInner {
    /// copy-on-write state snapshot; readers take one clone under the read
    /// lock and never block on writers afterwards.
    state: RwLock<Arc<DbState>>,
    /// serializes writers, rotation and flush bookkeeping.
    state_lock: Mutex<()>,
    /// signalled whenever the immutable list shrinks.
    flush_cv: Condvar,
    config: Arc<Config>,
    version_manager: Arc<VersionManager>,
    mvcc: Arc<TransactionManager>,
    compaction: Arc<CompactionEngine>,
    pool: crate::pool::ThreadPool,
    block_cache: Arc<BlockCache>,
    next_memtable_id: AtomicUsize,
    compaction_in_flight: AtomicBool,
    shutdown: AtomicBool,
}

impl DbInner {
    pub(crate) fn mvcc(&self) -> &Arc<TransactionManager> {
        &self.mvcc
    }

    pub(crate) fn version_manager(&self) -> &Arc<VersionManager> {
        &self.version_manager
    }

    pub(crate) fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /*----------------read path------------------------------------*/

    /// Layered lookup: mutable memtable, immutables newest first, then the
    /// pinned latest version's levels.
    pub fn get_with_txn(&self, key: &[u8], txn: TxnId) -> Result<LookupResult> {
        let snapshot = { self.state.read().clone() };

        let result = snapshot.memtable.get(key, txn);
        if result.is_conclusive() {
            return Ok(result);
        }
        for imm in snapshot.immutables.iter().rev() {
            let result = imm.get(key, txn);
            if result.is_conclusive() {
                return Ok(result);
            }
        }

        let version = self.version_manager.acquire_latest();
        version.get(key, txn, |meta| {
            self.version_manager
                .get_from_sst(key, txn, meta.sst_id, meta.file_size)
        })
    }

    /*----------------write path-----------------------------------*/

    /// Autocommit write: the commit id is allocated under the write lock so
    /// id order matches lock order.
    pub fn write_autocommit(self: &Arc<Self>, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let mut guard = self.state_lock.lock();
        let txn = self.mvcc.allocate_commit();
        {
            let state = self.state.read();
            match value {
                Some(value) => state.memtable.put(key, value, txn)?,
                None => state.memtable.delete(key, txn)?,
            }
        }
        self.maybe_rotate_and_wait(&mut guard)
    }

    /// Write at an explicit transaction id.
    pub fn put_with_txn(self: &Arc<Self>, key: &[u8], value: &[u8], txn: TxnId) -> Result<()> {
        let mut guard = self.state_lock.lock();
        {
            let state = self.state.read();
            state.memtable.put(key, value, txn)?;
        }
        self.mvcc.observe_commit(txn);
        self.maybe_rotate_and_wait(&mut guard)
    }

    pub fn delete_with_txn(self: &Arc<Self>, key: &[u8], txn: TxnId) -> Result<()> {
        let mut guard = self.state_lock.lock();
        {
            let state = self.state.read();
            state.memtable.delete(key, txn)?;
        }
        self.mvcc.observe_commit(txn);
        self.maybe_rotate_and_wait(&mut guard)
    }

    /// Publish a transaction's buffered writes under a fresh commit id.
    pub(crate) fn commit_transaction(
        self: &Arc<Self>,
        handle: u64,
        records: &[WriteBatchRecord<Bytes>],
    ) -> Result<()> {
        let mut guard = self.state_lock.lock();
        let txn = self.mvcc.allocate_commit();
        {
            let state = self.state.read();
            state.memtable.batch(records, txn)?;
        }
        self.mvcc.set_status(handle, TxnStatus::Committed);
        self.maybe_rotate_and_wait(&mut guard)
    }

    /// Rotate when the memtable is over its limit, then apply back-pressure
    /// while too many immutables are waiting on flushes.
    fn maybe_rotate_and_wait(self: &Arc<Self>, guard: &mut MutexGuard<'_, ()>) -> Result<()> {
        let over_limit =
            { self.state.read().memtable.byte_size() >= self.config.memtable_size_limit };
        if over_limit {
            self.rotate_memtable(guard);
        }
        loop {
            let queued = self.state.read().immutables.len();
            if queued < self.config.max_immutables {
                return Ok(());
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(Error::BackPressureShutdown);
            }
            self.flush_cv.wait(guard);
        }
    }

    /// Freeze the mutable memtable, install a fresh one, submit the flush.
    fn rotate_memtable(self: &Arc<Self>, _guard: &MutexGuard<'_, ()>) {
        let id = self.next_memtable_id.fetch_add(1, Ordering::Relaxed);
        let fresh = Arc::new(MemTable::create(id));
        let frozen;
        {
            let mut state = self.state.write();
            let mut snapshot = state.as_ref().clone();
            frozen = std::mem::replace(&mut snapshot.memtable, fresh);
            snapshot.immutables.push(frozen.clone());
            *state = Arc::new(snapshot);
        }
        info!(
            memtable = frozen.id(),
            bytes = frozen.byte_size(),
            "rotated memtable"
        );
        let inner = self.clone();
        self.pool.spawn(move || inner.flush_job_with_retry(frozen));
    }

    /*----------------flush----------------------------------------*/

    fn flush_job_with_retry(self: &Arc<Self>, imm: Arc<MemTable>) {
        let mut delay = Duration::from_millis(10);
        loop {
            match self.flush_job(&imm) {
                Ok(()) => return,
                Err(e) => {
                    error!(memtable = imm.id(), error = %e, "flush failed, will retry");
                    if self.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_secs(1));
                }
            }
        }
    }

    /// Build one L0 table from a frozen memtable and install it.
    fn flush_job(self: &Arc<Self>, imm: &Arc<MemTable>) -> Result<()> {
        if !imm.is_empty() {
            let sst_id = self.version_manager.allocate_sst_id();
            let mut builder = crate::table::SsTableBuilder::new(self.config.block_size);
            imm.flush(&mut builder)?;
            let path = sst_path(&self.config.data_path, sst_id);
            let table = match builder.build(sst_id, Some(self.block_cache.clone()), &path) {
                Ok(table) => Arc::new(table),
                Err(e) => {
                    let _ = std::fs::remove_file(&path);
                    return Err(e);
                }
            };

            let mut edit = VersionEdit::default();
            edit.add_file(
                sst_id,
                0,
                table.table_size(),
                table.first_key().to_vec(),
                table.last_key().to_vec(),
            );
            edit.next_sst_id = self.version_manager.next_sst_id();
            self.version_manager.insert_table(table.clone());
            if let Err(e) = self.version_manager.apply_edit(&edit) {
                self.version_manager.delete_files(&[sst_id]);
                return Err(e);
            }
            info!(
                memtable = imm.id(),
                sst_id,
                bytes = table.table_size(),
                "flushed memtable to level 0"
            );
        }

        {
            let _guard = self.state_lock.lock();
            let mut state = self.state.write();
            let mut snapshot = state.as_ref().clone();
            snapshot.immutables.retain(|m| m.id() != imm.id());
            *state = Arc::new(snapshot);
            self.flush_cv.notify_all();
        }
        self.maybe_schedule_compaction();
        Ok(())
    }

    /*----------------compaction scheduling------------------------*/

    pub(crate) fn maybe_schedule_compaction(self: &Arc<Self>) {
        if !self.version_manager.acquire_latest().need_compaction() {
            return;
        }
        if self
            .compaction_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let inner = self.clone();
        self.pool.spawn(move || inner.compaction_job_with_retry());
    }

    fn compaction_job_with_retry(self: &Arc<Self>) {
        let mut delay = Duration::from_millis(10);
        loop {
            match self.compaction.run_once() {
                Ok(did_work) => {
                    self.compaction_in_flight.store(false, Ordering::SeqCst);
                    if did_work {
                        // scores moved; there may be more to do.
                        self.maybe_schedule_compaction();
                    }
                    return;
                }
                Err(e) => {
                    error!(error = %e, "compaction failed, will retry");
                    if self.shutdown.load(Ordering::SeqCst) {
                        self.compaction_in_flight.store(false, Ordering::SeqCst);
                        return;
                    }
                    thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_secs(1));
                }
            }
        }
    }

    /// Run one compaction synchronously on the caller. For tests and the
    /// shell's `compact` command.
    pub fn force_compaction(&self) -> Result<bool> {
        self.compaction.run_once()
    }

    pub(crate) fn compaction_state(&self) -> crate::compact::CompactionState {
        self.compaction.state()
    }

    /// No compaction running or queued, and the latest version does not
    /// want one.
    pub(crate) fn compaction_quiesced(&self) -> bool {
        !self.compaction_in_flight.load(Ordering::SeqCst)
            && !self.version_manager.acquire_latest().need_compaction()
    }

    /*----------------flush barrier / shutdown---------------------*/

    /// Freeze the current memtable (if non-empty) and wait until every
    /// immutable has been flushed.
    pub fn force_flush(self: &Arc<Self>) -> Result<()> {
        let mut guard = self.state_lock.lock();
        let has_data = { !self.state.read().memtable.is_empty() };
        if has_data {
            self.rotate_memtable(&guard);
        }
        loop {
            if self.state.read().immutables.is_empty() {
                return Ok(());
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(Error::BackPressureShutdown);
            }
            self.flush_cv.wait(&mut guard);
        }
    }

    /*----------------transactions---------------------------------*/

    pub fn begin(self: &Arc<Self>) -> Arc<Transaction> {
        let read_txn = self.mvcc.register_reader();
        let handle = self.mvcc.issue_handle(read_txn);
        Arc::new(Transaction {
            read_txn,
            handle,
            db: self.clone(),
            local: crossbeam_skiplist::SkipMap::new(),
            finished: AtomicBool::new(false),
        })
    }

    /*----------------range scans----------------------------------*/

    pub fn iter_range(
        self: &Arc<Self>,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        txn: Option<TxnId>,
    ) -> Result<DbIterator> {
        let read_txn = txn.unwrap_or_else(|| self.mvcc.latest_commit());
        let snapshot = { self.state.read().clone() };
        let version = self.version_manager.acquire_latest();
        iterator::build_range_iterator(self, snapshot, version, lower, upper, read_txn)
    }
}

/// The public engine handle. Dropping it flushes and shuts the worker pool
/// down.
pub struct Db {
    inner: Arc<DbInner>,
    closed: AtomicBool,
}

impl Db {
    /// Open (or recover) an engine rooted at `path`.
    pub fn open(path: impl AsRef<Path>, mut config: Config) -> Result<Db> {
        config.data_path = path.as_ref().to_path_buf();
        config.validate()?;
        std::fs::create_dir_all(&config.data_path)?;
        let config = Arc::new(config);

        let table_cache = Arc::new(TableCache::new(config.table_cache_capacity));
        let block_cache = Arc::new(BlockCache::new(config.block_cache_capacity));

        let (gc_tx, gc_rx) = unbounded::<GcTask>();
        let version_manager = Arc::new(VersionManager::open(
            config.clone(),
            table_cache,
            block_cache.clone(),
            gc_tx,
        )?);

        // the commit counter resumes past everything durable on disk.
        let mut max_commit = 0;
        {
            let latest = version_manager.acquire_latest();
            for meta in latest.levels().iter().flatten() {
                let table = version_manager.table_reader(meta.sst_id)?;
                max_commit = max_commit.max(table.max_txn());
            }
        }
        let mvcc = Arc::new(TransactionManager::new(max_commit));
        let compaction = Arc::new(CompactionEngine::new(
            config.clone(),
            version_manager.clone(),
            mvcc.clone(),
            block_cache.clone(),
        ));

        // the worker holds only a weak handle; once the manager (and with it
        // every sender) is gone, recv fails and the thread exits.
        let gc_manager = Arc::downgrade(&version_manager);
        thread::Builder::new()
            .name("lsmkv-gc".to_string())
            .spawn(move || {
                while let Ok(task) = gc_rx.recv() {
                    let Some(manager) = gc_manager.upgrade() else {
                        break;
                    };
                    match task {
                        GcTask::RetireVersion(id) => manager.remove_obsolete_version(id),
                        GcTask::DeleteFiles(ids) => manager.delete_files(&ids),
                    }
                }
            })?;

        let inner = Arc::new(DbInner {
            state: RwLock::new(Arc::new(DbState {
                memtable: Arc::new(MemTable::create(0)),
                immutables: Vec::new(),
            })),
            state_lock: Mutex::new(()),
            flush_cv: Condvar::new(),
            pool: crate::pool::ThreadPool::new(config.worker_threads),
            config,
            version_manager,
            mvcc,
            compaction,
            block_cache,
            next_memtable_id: AtomicUsize::new(1),
            compaction_in_flight: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });
        let db = Db {
            inner,
            closed: AtomicBool::new(false),
        };
        db.inner.maybe_schedule_compaction();
        Ok(db)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.write_autocommit(key, Some(value))
    }

    pub fn put_with_txn(&self, key: &[u8], value: &[u8], txn: TxnId) -> Result<()> {
        self.inner.put_with_txn(key, value, txn)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.write_autocommit(key, None)
    }

    pub fn delete_with_txn(&self, key: &[u8], txn: TxnId) -> Result<()> {
        self.inner.delete_with_txn(key, txn)
    }

    /// Read at the latest commit. `TooManyOpenFiles` surfaces as an error
    /// so the caller can retry; a tombstone reads as absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let txn = self.inner.mvcc.latest_commit();
        match self.inner.get_with_txn(key, txn)? {
            LookupResult::TooManyOpenFiles => Err(Error::TooManyOpenFiles),
            result => Ok(result.into_value()),
        }
    }

    /// Read at an explicit snapshot, exposing the full lookup result.
    pub fn get_with_txn(&self, key: &[u8], txn: TxnId) -> Result<LookupResult> {
        self.inner.get_with_txn(key, txn)
    }

    pub fn begin(&self) -> Arc<Transaction> {
        self.inner.begin()
    }

    pub fn txn_status(&self, handle: u64) -> TxnStatus {
        self.inner.mvcc.status(handle)
    }

    pub fn iter_range(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        txn: Option<TxnId>,
    ) -> Result<DbIterator> {
        self.inner.iter_range(lower, upper, txn)
    }

    pub fn force_flush(&self) -> Result<()> {
        self.inner.force_flush()
    }

    /// Run one compaction cycle on the calling thread.
    pub fn force_compaction(&self) -> Result<bool> {
        self.inner.force_compaction()
    }

    /// Flush everything buffered and stop background work. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.inner.force_flush();
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.flush_cv.notify_all();
        result
    }

    pub(crate) fn inner(&self) -> &Arc<DbInner> {
        &self.inner
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "flush on close failed");
        }
    }
}
