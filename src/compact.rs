use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::BlockCache;
use crate::config::Config;
use crate::entry::ValueKind;
use crate::error::Result;
use crate::iterators::merge_iterator::MergeIterator;
use crate::iterators::StorageIterator;
use crate::mvcc::TransactionManager;
use crate::table::{SsTable, SsTableBuilder, SsTableIterator};
use crate::version::manager::sst_path;
use crate::version::{SstMetadata, Version, VersionEdit, VersionManager};

/// Where a compaction currently is. Failure during `Writing` unlinks the
/// partial outputs and falls back to `Idle` without touching the version
/// chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionState {
    Idle,
    Picking,
    Merging,
    Writing,
    Installing,
}

/// The inputs of one compaction: files taken from `upper_level` and the
/// overlapping files one level below.
pub struct CompactionTask {
    pub upper_level: usize,
    pub upper: Vec<Arc<SstMetadata>>,
    pub lower: Vec<Arc<SstMetadata>>,
    pub output_level: usize,
    pub is_bottom_level: bool,
}

/// Picks, merges and installs compactions against the latest version. One
/// job runs at a time; the db orchestrator handles scheduling and retry.
pub struct CompactionEngine {
    config: Arc<Config>,
    version_manager: Arc<VersionManager>,
    mvcc: Arc<TransactionManager>,
    block_cache: Arc<BlockCache>,
    state: Mutex<CompactionState>,
    /// held for a whole run; concurrent callers queue up and then observe
    /// the freshly installed version.
    run_lock: Mutex<()>,
    /// last upper sst id compacted per level, for round-robin picks.
    cursor: Mutex<HashMap<usize, u64>>,
}

impl CompactionEngine {
    pub fn new(
        config: Arc<Config>,
        version_manager: Arc<VersionManager>,
        mvcc: Arc<TransactionManager>,
        block_cache: Arc<BlockCache>,
    ) -> Self {
        Self {
            config,
            version_manager,
            mvcc,
            block_cache,
            state: Mutex::new(CompactionState::Idle),
            run_lock: Mutex::new(()),
            cursor: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> CompactionState {
        *self.state.lock()
    }

    fn set_state(&self, state: CompactionState) {
        *self.state.lock() = state;
    }

    /// Run a full pick/merge/install cycle against the latest version.
    /// Returns whether any work was done.
    pub fn run_once(&self) -> Result<bool> {
        let _run = self.run_lock.lock();
        // pin the version for the whole run so input files stay on disk.
        let version = self.version_manager.acquire_latest();
        if !version.need_compaction() {
            return Ok(false);
        }

        self.set_state(CompactionState::Picking);
        let Some(task) = self.pick(&version) else {
            self.set_state(CompactionState::Idle);
            return Ok(false);
        };
        info!(
            level = task.upper_level,
            upper_files = task.upper.len(),
            lower_files = task.lower.len(),
            "compaction picked"
        );

        self.set_state(CompactionState::Merging);
        let outputs = match self.merge_and_write(&task) {
            Ok(outputs) => outputs,
            Err(e) => {
                self.set_state(CompactionState::Idle);
                return Err(e);
            }
        };

        self.set_state(CompactionState::Installing);
        let mut edit = VersionEdit::default();
        for meta in task.upper.iter().chain(task.lower.iter()) {
            edit.delete_file(meta.sst_id, meta.level);
        }
        for table in &outputs {
            edit.add_file(
                table.sst_id(),
                task.output_level,
                table.table_size(),
                table.first_key().to_vec(),
                table.last_key().to_vec(),
            );
        }
        edit.next_sst_id = self.version_manager.next_sst_id();

        if let Err(e) = self.version_manager.apply_edit(&edit) {
            // outputs never became visible; unlink them.
            let ids: Vec<u64> = outputs.iter().map(|t| t.sst_id()).collect();
            self.version_manager.delete_files(&ids);
            self.set_state(CompactionState::Idle);
            return Err(e);
        }

        if let Some(last) = task.upper.iter().map(|meta| meta.sst_id).max() {
            self.cursor.lock().insert(task.upper_level, last);
        }
        info!(
            level = task.upper_level,
            outputs = outputs.len(),
            "compaction installed"
        );
        self.set_state(CompactionState::Idle);
        Ok(true)
    }

    fn pick(&self, version: &Version) -> Option<CompactionTask> {
        let level = version.pick_level_to_compact()?;
        if level == 0 {
            self.pick_l0(version)
        } else {
            self.pick_ln(version, level)
        }
    }

    /// L0 -> L1: start from the oldest L0 file and grow its key range to a
    /// fixed point over the overlapping L0 files, then take the L1 files
    /// that range touches.
    fn pick_l0(&self, version: &Version) -> Option<CompactionTask> {
        if self.config.num_levels < 2 {
            debug!("single-level tree, nothing to compact into");
            return None;
        }
        let l0 = &version.levels()[0];
        let oldest = l0.iter().min_by_key(|meta| meta.sst_id)?;

        let mut smallest = oldest.smallest_key.clone();
        let mut largest = oldest.largest_key.clone();
        let mut selected: BTreeSet<u64> = BTreeSet::from([oldest.sst_id]);
        loop {
            let mut grew = false;
            for meta in l0 {
                if selected.contains(&meta.sst_id) || !meta.overlaps(&smallest, &largest) {
                    continue;
                }
                selected.insert(meta.sst_id);
                if meta.smallest_key < smallest {
                    smallest = meta.smallest_key.clone();
                }
                if meta.largest_key > largest {
                    largest = meta.largest_key.clone();
                }
                grew = true;
            }
            if !grew {
                break;
            }
        }

        let upper: Vec<Arc<SstMetadata>> = l0
            .iter()
            .filter(|meta| selected.contains(&meta.sst_id))
            .cloned()
            .collect();
        let lower = overlapping_files(&version.levels()[1], &smallest, &largest);
        Some(CompactionTask {
            upper_level: 0,
            upper,
            lower,
            output_level: 1,
            is_bottom_level: self.config.num_levels == 2,
        })
    }

    /// L -> L+1: take the round-robin next file of the level plus whatever
    /// it overlaps below.
    fn pick_ln(&self, version: &Version, level: usize) -> Option<CompactionTask> {
        if level + 1 >= self.config.num_levels {
            return None;
        }
        let files = &version.levels()[level];
        let last = self.cursor.lock().get(&level).copied().unwrap_or(0);
        let picked = files
            .iter()
            .find(|meta| meta.sst_id > last)
            .or_else(|| files.first())?
            .clone();
        let lower = overlapping_files(
            &version.levels()[level + 1],
            &picked.smallest_key,
            &picked.largest_key,
        );
        Some(CompactionTask {
            upper_level: level,
            upper: vec![picked],
            lower,
            output_level: level + 1,
            is_bottom_level: level + 2 == self.config.num_levels,
        })
    }

    /// Merge the inputs newest-first and write the surviving entries into
    /// fresh output tables. Partial outputs are unlinked on failure.
    fn merge_and_write(&self, task: &CompactionTask) -> Result<Vec<Arc<SsTable>>> {
        let mut inputs: Vec<Arc<SstMetadata>> = task.upper.clone();
        if task.upper_level == 0 {
            // L0 files overlap; higher sst id means newer data.
            inputs.sort_by(|a, b| b.sst_id.cmp(&a.sst_id));
        }
        inputs.extend(task.lower.iter().cloned());

        let mut iters = Vec::with_capacity(inputs.len());
        for meta in &inputs {
            let table = self.version_manager.table_reader(meta.sst_id)?;
            iters.push(Box::new(SsTableIterator::create_and_seek_to_first(table)?));
        }
        let mut iter = MergeIterator::create(iters);

        self.set_state(CompactionState::Writing);
        let mut outputs = Vec::new();
        match self.write_outputs(&mut iter, task, &mut outputs) {
            Ok(()) => Ok(outputs),
            Err(e) => {
                let ids: Vec<u64> = outputs.iter().map(|t| t.sst_id()).collect();
                self.version_manager.delete_files(&ids);
                Err(e)
            }
        }
    }

    /// The per-key collapsing rule: keep every version newer than the
    /// oldest live snapshot, keep the newest version at or below it, drop
    /// the rest. A tombstone that survives as the newest visible version is
    /// itself dropped when writing the bottom level.
    fn write_outputs(
        &self,
        iter: &mut MergeIterator<SsTableIterator>,
        task: &CompactionTask,
        outputs: &mut Vec<Arc<SsTable>>,
    ) -> Result<()> {
        let min_live_txn = self.mvcc.min_live_txn();
        let mut builder: Option<SsTableBuilder> = None;
        let mut last_key = Vec::<u8>::new();
        let mut first_key_below_watermark = false;

        while iter.is_valid() {
            if builder.is_none() {
                builder = Some(SsTableBuilder::new(self.config.block_size));
            }

            let same_as_last_key = iter.key().key_ref() == last_key;
            if !same_as_last_key {
                first_key_below_watermark = true;
            }

            if task.is_bottom_level
                && !same_as_last_key
                && iter.txn() <= min_live_txn
                && iter.kind() == ValueKind::Deleted
            {
                // nothing below the bottom level can resurrect this key.
                last_key.clear();
                last_key.extend(iter.key().key_ref());
                first_key_below_watermark = false;
                iter.next()?;
                continue;
            }

            if iter.txn() <= min_live_txn {
                if same_as_last_key && !first_key_below_watermark {
                    // shadowed by a newer version every snapshot can see.
                    iter.next()?;
                    continue;
                }
                first_key_below_watermark = false;
            }

            let builder_inner = builder.as_mut().expect("installed above");
            if builder_inner.estimated_size() >= self.config.target_file_size() && !same_as_last_key
            {
                let full = builder.take().expect("checked non-none");
                outputs.push(self.finish_output(full)?);
                builder = Some(SsTableBuilder::new(self.config.block_size));
            }

            let builder_inner = builder.as_mut().expect("installed above");
            builder_inner.add(iter.key(), iter.value())?;

            if !same_as_last_key {
                last_key.clear();
                last_key.extend(iter.key().key_ref());
            }
            iter.next()?;
        }

        if let Some(builder) = builder {
            if !builder.is_empty() {
                outputs.push(self.finish_output(builder)?);
            }
        }
        Ok(())
    }

    fn finish_output(&self, builder: SsTableBuilder) -> Result<Arc<SsTable>> {
        let sst_id = self.version_manager.allocate_sst_id();
        let path = sst_path(&self.version_manager.config().data_path, sst_id);
        let table = match builder.build(sst_id, Some(self.block_cache.clone()), &path) {
            Ok(table) => Arc::new(table),
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };
        self.version_manager.insert_table(table.clone());
        debug!(sst_id, bytes = table.table_size(), "compaction output written");
        Ok(table)
    }
}

/// All files of a sorted, disjoint level whose range intersects
/// `[smallest, largest]`.
fn overlapping_files(
    files: &[Arc<SstMetadata>],
    smallest: &[u8],
    largest: &[u8],
) -> Vec<Arc<SstMetadata>> {
    let start = files.partition_point(|meta| meta.largest_key.as_ref() < smallest);
    files[start..]
        .iter()
        .take_while(|meta| meta.smallest_key.as_ref() <= largest)
        .cloned()
        .collect()
}
