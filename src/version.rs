pub mod edit;
pub mod manager;

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::Sender;

use crate::entry::{LookupResult, TxnId};
use crate::error::Result;

pub use edit::VersionEdit;
pub use manager::VersionManager;

/// Work items for the reclamation worker. Sent instead of touching manager
/// locks inline from drop paths.
pub enum GcTask {
    /// A version's refcount hit zero; unregister it and unpin its files.
    RetireVersion(u64),
    /// These SSTs are unreferenced; close and unlink them.
    DeleteFiles(Vec<u64>),
}

/// Shared descriptor of one on-disk SST. `ref_count` counts the live
/// versions that include the file; the file is unlinked once it reaches
/// zero.
#[derive(Debug)]
pub struct SstMetadata {
    pub sst_id: u64,
    pub level: usize,
    pub file_size: u64,
    pub smallest_key: Bytes,
    pub largest_key: Bytes,
    pub ref_count: AtomicU64,
}

impl SstMetadata {
    pub fn new(
        sst_id: u64,
        level: usize,
        file_size: u64,
        smallest_key: Bytes,
        largest_key: Bytes,
    ) -> Self {
        Self {
            sst_id,
            level,
            file_size,
            smallest_key,
            largest_key,
            ref_count: AtomicU64::new(0),
        }
    }

    /// Does `[smallest_key, largest_key]` contain `key`?
    pub fn contains(&self, key: &[u8]) -> bool {
        self.smallest_key.as_ref() <= key && key <= self.largest_key.as_ref()
    }

    /// Does the file's range intersect `[smallest, largest]`?
    pub fn overlaps(&self, smallest: &[u8], largest: &[u8]) -> bool {
        self.smallest_key.as_ref() <= largest && smallest <= self.largest_key.as_ref()
    }
}

/// An immutable snapshot of the file set, one `Vec` of files per level.
/// Level 0 may overlap and is probed newest-first; levels >= 1 are sorted by
/// `smallest_key` with pairwise disjoint ranges. Readers and compactions
/// pin a version via its refcount; the drop to zero mails a retire task to
/// the version manager instead of taking its locks here.
pub struct Version {
    version_id: u64,
    levels: Vec<Vec<Arc<SstMetadata>>>,
    level_scores: Vec<f64>,
    ref_count: AtomicU64,
    gc_tx: Sender<GcTask>,
}

impl Version {
    pub(crate) fn new(
        version_id: u64,
        levels: Vec<Vec<Arc<SstMetadata>>>,
        level_scores: Vec<f64>,
        gc_tx: Sender<GcTask>,
    ) -> Self {
        Self {
            version_id,
            levels,
            level_scores,
            ref_count: AtomicU64::new(0),
            gc_tx,
        }
    }

    pub fn version_id(&self) -> u64 {
        self.version_id
    }

    pub fn levels(&self) -> &[Vec<Arc<SstMetadata>>] {
        &self.levels
    }

    pub fn level_scores(&self) -> &[f64] {
        &self.level_scores
    }

    pub fn ref_count(&self) -> u64 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release(&self) {
        if self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            // nobody references this snapshot anymore; reclamation happens
            // on the gc worker. Send failure means the engine is gone.
            let _ = self.gc_tx.send(GcTask::RetireVersion(self.version_id));
        }
    }

    /// Layered point lookup across the on-disk levels. `probe` opens and
    /// searches one SST, normally through the version manager's caches.
    pub fn get<F>(&self, key: &[u8], txn: TxnId, mut probe: F) -> Result<LookupResult>
    where
        F: FnMut(&SstMetadata) -> Result<LookupResult>,
    {
        // L0 files overlap, so every file containing the key is a
        // candidate, probed newest (highest sst id) first.
        let mut candidates: Vec<&Arc<SstMetadata>> = self.levels[0]
            .iter()
            .filter(|meta| meta.contains(key))
            .collect();
        candidates.sort_by(|a, b| b.sst_id.cmp(&a.sst_id));
        for meta in candidates {
            let result = probe(meta)?;
            if result.is_conclusive() {
                return Ok(result);
            }
        }

        // deeper levels are disjoint: at most one file per level can hold
        // the key.
        for level in 1..self.levels.len() {
            let Some(meta) = self.find_file_at_level(level, key) else {
                continue;
            };
            let result = probe(meta)?;
            if result.is_conclusive() {
                return Ok(result);
            }
        }
        Ok(LookupResult::NotFound)
    }

    /// Binary search a sorted, disjoint level for the file whose range
    /// contains `key`.
    pub(crate) fn find_file_at_level(&self, level: usize, key: &[u8]) -> Option<&Arc<SstMetadata>> {
        let files = &self.levels[level];
        let idx = files.partition_point(|meta| meta.largest_key.as_ref() < key);
        files.get(idx).filter(|meta| meta.smallest_key.as_ref() <= key)
    }

    pub fn need_compaction(&self) -> bool {
        self.level_scores.iter().any(|score| *score >= 1.0)
    }

    /// The level with the highest score, ties toward the lower level.
    pub fn pick_level_to_compact(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (level, score) in self.level_scores.iter().enumerate() {
            if best.map_or(true, |(_, best_score)| *score > best_score) {
                best = Some((level, *score));
            }
        }
        best.map(|(level, _)| level)
    }

    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.levels[level].len()
    }
}

/// RAII pin on a version. Readers hold one of these for the duration of a
/// lookup or scan so the files it references cannot be unlinked under them.
pub struct VersionRef {
    version: Arc<Version>,
}

impl VersionRef {
    pub(crate) fn new(version: Arc<Version>) -> Self {
        version.acquire();
        Self { version }
    }
}

impl Deref for VersionRef {
    type Target = Version;

    fn deref(&self) -> &Version {
        &self.version
    }
}

impl Clone for VersionRef {
    fn clone(&self) -> Self {
        VersionRef::new(self.version.clone())
    }
}

impl Drop for VersionRef {
    fn drop(&mut self) {
        self.version.release();
    }
}
