use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::Sender;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{GcTask, SstMetadata, Version, VersionEdit, VersionRef};
use crate::cache::{BlockCache, TableCache};
use crate::config::Config;
use crate::entry::{LookupResult, TxnId};
use crate::error::{Error, Result};
use crate::manifest::{Manifest, MANIFEST_NAME};
use crate::table::{FileObject, SsTable};

/// `{data_path}/{sst_id}.sst`
pub(crate) fn sst_path(dir: &Path, sst_id: u64) -> PathBuf {
    dir.join(format!("{sst_id}.sst"))
}

struct ManagerInner {
    latest: Arc<Version>,
    /// superseded versions still pinned by readers or compactions.
    others: HashMap<u64, Arc<Version>>,
}

/// Owns the version chain: installs edits atomically, hands out pinned
/// snapshots, replays the manifest on startup, and reclaims whatever the
/// retire mailbox reports as dead.
pub struct VersionManager {
    inner: RwLock<ManagerInner>,
    /// next ids to hand out.
    next_version_id: AtomicU64,
    next_sst_id: AtomicU64,
    manifest: Manifest,
    config: Arc<Config>,
    table_cache: Arc<TableCache>,
    block_cache: Arc<BlockCache>,
    gc_tx: Sender<GcTask>,
}

impl VersionManager {
    /// Open against `config.data_path`: recover from an existing manifest,
    /// or start a fresh one with an empty version.
    pub fn open(
        config: Arc<Config>,
        table_cache: Arc<TableCache>,
        block_cache: Arc<BlockCache>,
        gc_tx: Sender<GcTask>,
    ) -> Result<Self> {
        let manifest_path = config.data_path.join(MANIFEST_NAME);
        if manifest_path.exists() {
            Self::recover(config, table_cache, block_cache, gc_tx, &manifest_path)
        } else {
            let manifest = Manifest::create(&manifest_path)?;
            let levels = empty_levels(config.num_levels);
            let scores = compute_scores(&levels, &config);
            let latest = Arc::new(Version::new(1, levels, scores, gc_tx.clone()));
            latest.acquire();
            Ok(Self {
                inner: RwLock::new(ManagerInner {
                    latest,
                    others: HashMap::new(),
                }),
                next_version_id: AtomicU64::new(2),
                next_sst_id: AtomicU64::new(1),
                manifest,
                config,
                table_cache,
                block_cache,
                gc_tx,
            })
        }
    }

    /// Replay the manifest edit by edit. The final file set becomes the
    /// latest version; a referenced file missing on disk aborts the open.
    fn recover(
        config: Arc<Config>,
        table_cache: Arc<TableCache>,
        block_cache: Arc<BlockCache>,
        gc_tx: Sender<GcTask>,
        manifest_path: &Path,
    ) -> Result<Self> {
        let (manifest, edits) = Manifest::recover(manifest_path)?;
        let replayed = edits.len();

        let mut levels = empty_levels(config.num_levels);
        let mut next_sst_id = 1;
        for edit in &edits {
            apply_edit_to_levels(&mut levels, edit)?;
            next_sst_id = next_sst_id.max(edit.next_sst_id);
        }

        let mut live_files = 0;
        for files in &levels {
            for meta in files {
                let path = sst_path(&config.data_path, meta.sst_id);
                if !path.exists() {
                    return Err(Error::FileNotFound(path.display().to_string()));
                }
                meta.ref_count.fetch_add(1, Ordering::Relaxed);
                next_sst_id = next_sst_id.max(meta.sst_id + 1);
                live_files += 1;
            }
        }

        let scores = compute_scores(&levels, &config);
        let version_id = replayed as u64 + 1;
        let latest = Arc::new(Version::new(version_id, levels, scores, gc_tx.clone()));
        latest.acquire();
        info!(replayed, live_files, version_id, "recovered from manifest");

        Ok(Self {
            inner: RwLock::new(ManagerInner {
                latest,
                others: HashMap::new(),
            }),
            next_version_id: AtomicU64::new(version_id + 1),
            next_sst_id: AtomicU64::new(next_sst_id),
            manifest,
            config,
            table_cache,
            block_cache,
            gc_tx,
        })
    }

    pub fn allocate_sst_id(&self) -> u64 {
        self.next_sst_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next allocation would return; recorded in every edit.
    pub fn next_sst_id(&self) -> u64 {
        self.next_sst_id.load(Ordering::Relaxed)
    }

    /// Pin and return the current latest version.
    pub fn acquire_latest(&self) -> VersionRef {
        let inner = self.inner.read();
        VersionRef::new(inner.latest.clone())
    }

    /// Install an edit as the next version. The manifest append is fsynced
    /// before the version is published; unreferenced leftovers of the edit
    /// go to the gc worker.
    pub fn apply_edit(&self, edit: &VersionEdit) -> Result<Arc<Version>> {
        let mut inner = self.inner.write();
        let new_version_id = self.next_version_id.fetch_add(1, Ordering::Relaxed);

        let mut levels = inner.latest.levels().to_vec();
        apply_edit_to_levels(&mut levels, edit)?;
        for meta in levels.iter().flatten() {
            meta.ref_count.fetch_add(1, Ordering::AcqRel);
        }
        let scores = compute_scores(&levels, &self.config);

        if let Err(e) = self.manifest.add_record(edit) {
            // durability failed: the new version never existed.
            for meta in levels.iter().flatten() {
                meta.ref_count.fetch_sub(1, Ordering::AcqRel);
            }
            return Err(e);
        }

        // deleted files nobody referenced to begin with go straight to gc.
        let orphans: Vec<u64> = edit
            .deleted_files
            .iter()
            .filter(|(sst_id, level)| {
                inner
                    .latest
                    .levels()
                    .get(*level)
                    .and_then(|files| files.iter().find(|meta| meta.sst_id == *sst_id))
                    .map_or(false, |meta| meta.ref_count.load(Ordering::Acquire) == 0)
            })
            .map(|(sst_id, _)| *sst_id)
            .collect();

        let new_version = Arc::new(Version::new(
            new_version_id,
            levels,
            scores,
            self.gc_tx.clone(),
        ));
        new_version.acquire();

        let old = std::mem::replace(&mut inner.latest, new_version.clone());
        inner.others.insert(old.version_id(), old.clone());
        drop(inner);
        old.release();

        if !orphans.is_empty() {
            let _ = self.gc_tx.send(GcTask::DeleteFiles(orphans));
        }

        debug!(
            version_id = new_version_id,
            added = edit.added_files.len(),
            deleted = edit.deleted_files.len(),
            "installed version"
        );
        Ok(new_version)
    }

    /// Called from the gc worker once a version's refcount hit zero:
    /// unregister it and unpin every file it referenced.
    pub fn remove_obsolete_version(&self, version_id: u64) {
        let Some(version) = self.inner.write().others.remove(&version_id) else {
            return;
        };
        let mut dead_files = Vec::new();
        for meta in version.levels().iter().flatten() {
            if meta.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
                dead_files.push(meta.sst_id);
            }
        }
        debug!(version_id, dead_files = dead_files.len(), "retired version");
        if !dead_files.is_empty() {
            self.delete_files(&dead_files);
        }
    }

    /// Close cached readers and unlink the files. Runs on the gc worker or
    /// a pool job, never under the manager lock.
    pub fn delete_files(&self, sst_ids: &[u64]) {
        for &sst_id in sst_ids {
            self.table_cache.remove(&sst_id);
            let path = sst_path(&self.config.data_path, sst_id);
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(sst_id, "unlinked obsolete sst"),
                Err(e) => warn!(sst_id, error = %e, "failed to unlink obsolete sst"),
            }
        }
    }

    /// Fetch a table reader through the table cache, opening the file on
    /// miss.
    pub fn table_reader(&self, sst_id: u64) -> Result<Arc<SsTable>> {
        if let Some(handle) = self.table_cache.get(&sst_id) {
            return Ok(handle.value().clone());
        }
        let path = sst_path(&self.config.data_path, sst_id);
        let file = FileObject::open(&path)?;
        let table = Arc::new(SsTable::open(sst_id, Some(self.block_cache.clone()), file)?);
        let handle = self.table_cache.insert(sst_id, table);
        Ok(handle.value().clone())
    }

    /// Register a freshly built table so readers skip the first open.
    pub(crate) fn insert_table(&self, table: Arc<SsTable>) {
        let _ = self.table_cache.insert(table.sst_id(), table);
    }

    /// Point-probe one SST. An exhausted descriptor table is reported as a
    /// lookup tag so the caller can treat it as transient.
    pub fn get_from_sst(
        &self,
        key: &[u8],
        txn: TxnId,
        sst_id: u64,
        _file_size: u64,
    ) -> Result<LookupResult> {
        let table = match self.table_reader(sst_id) {
            Ok(table) => table,
            Err(Error::TooManyOpenFiles) => return Ok(LookupResult::TooManyOpenFiles),
            Err(e) => return Err(e),
        };
        table.get(key, txn)
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Number of superseded versions still alive, for tests and dumps.
    pub fn live_old_versions(&self) -> usize {
        self.inner.read().others.len()
    }
}

fn empty_levels(num_levels: usize) -> Vec<Vec<Arc<SstMetadata>>> {
    vec![Vec::new(); num_levels]
}

/// Apply one edit to a level layout: drop deleted files, append added L0
/// files, and linear-merge added files into the sorted deeper levels.
fn apply_edit_to_levels(
    levels: &mut [Vec<Arc<SstMetadata>>],
    edit: &VersionEdit,
) -> Result<()> {
    if !edit.deleted_files.is_empty() {
        for (level, files) in levels.iter_mut().enumerate() {
            files.retain(|meta| !edit.deleted_files.contains(&(meta.sst_id, level)));
        }
    }

    let mut added: Vec<Vec<Arc<SstMetadata>>> = vec![Vec::new(); levels.len()];
    for file in &edit.added_files {
        if file.level >= levels.len() {
            return Err(Error::CorruptManifest(format!(
                "sst {} added at level {} beyond num_levels {}",
                file.sst_id,
                file.level,
                levels.len()
            )));
        }
        added[file.level].push(Arc::new(SstMetadata::new(
            file.sst_id,
            file.level,
            file.file_size,
            Bytes::copy_from_slice(&file.smallest_key),
            Bytes::copy_from_slice(&file.largest_key),
        )));
    }

    for (level, mut new_files) in added.into_iter().enumerate() {
        if new_files.is_empty() {
            continue;
        }
        if level == 0 {
            levels[0].extend(new_files);
            continue;
        }
        // both runs are sorted and disjoint; a linear merge keeps the level
        // sorted by smallest key.
        new_files.sort_by(|a, b| a.smallest_key.cmp(&b.smallest_key));
        let existing = std::mem::take(&mut levels[level]);
        let mut merged = Vec::with_capacity(existing.len() + new_files.len());
        let (mut i, mut j) = (0, 0);
        while i < existing.len() && j < new_files.len() {
            if existing[i].smallest_key <= new_files[j].smallest_key {
                merged.push(existing[i].clone());
                i += 1;
            } else {
                merged.push(new_files[j].clone());
                j += 1;
            }
        }
        merged.extend_from_slice(&existing[i..]);
        merged.extend_from_slice(&new_files[j..]);
        levels[level] = merged;
    }
    Ok(())
}

/// Score every level. L0 scores by file count against the compaction
/// trigger; deeper levels by total bytes against their budget. The bottom
/// level has nowhere to push data, so it never scores.
fn compute_scores(levels: &[Vec<Arc<SstMetadata>>], config: &Config) -> Vec<f64> {
    let mut scores = vec![0.0; levels.len()];
    scores[0] = levels[0].len() as f64 / config.l0_compaction_trigger as f64;
    for (level, files) in levels.iter().enumerate().skip(1) {
        if level == levels.len() - 1 {
            break;
        }
        let total_bytes: u64 = files.iter().map(|meta| meta.file_size).sum();
        scores[level] = total_bytes as f64 / config.max_bytes_for_level(level) as f64;
    }
    scores
}
