use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver};
use tempfile::TempDir;

use crate::cache::{BlockCache, TableCache};
use crate::entry::LookupResult;
use crate::tests::harness::test_config;
use crate::version::{GcTask, SstMetadata, Version, VersionEdit, VersionManager};

fn meta(sst_id: u64, level: usize, smallest: &[u8], largest: &[u8]) -> Arc<SstMetadata> {
    Arc::new(SstMetadata::new(
        sst_id,
        level,
        1024,
        Bytes::copy_from_slice(smallest),
        Bytes::copy_from_slice(largest),
    ))
}

fn test_version(levels: Vec<Vec<Arc<SstMetadata>>>, scores: Vec<f64>) -> Version {
    let (gc_tx, _gc_rx) = unbounded();
    // the receiver is dropped on purpose; these versions are never released.
    Version::new(1, levels, scores, gc_tx)
}

fn open_manager(dir: &TempDir) -> (Arc<VersionManager>, Receiver<GcTask>) {
    let config = Arc::new(test_config(dir.path()));
    let (gc_tx, gc_rx) = unbounded();
    let manager = VersionManager::open(
        config.clone(),
        Arc::new(TableCache::new(config.table_cache_capacity)),
        Arc::new(BlockCache::new(config.block_cache_capacity)),
        gc_tx,
    )
    .unwrap();
    (Arc::new(manager), gc_rx)
}

/// Drain the retire mailbox the way the db's gc worker would.
fn drain_gc(manager: &VersionManager, gc_rx: &Receiver<GcTask>) {
    while let Ok(task) = gc_rx.try_recv() {
        match task {
            GcTask::RetireVersion(id) => manager.remove_obsolete_version(id),
            GcTask::DeleteFiles(ids) => manager.delete_files(&ids),
        }
    }
}

#[test]
fn test_get_probes_l0_newest_first() {
    let levels = vec![
        vec![
            meta(1, 0, b"a", b"m"),
            meta(3, 0, b"f", b"z"),
            meta(2, 0, b"c", b"h"),
        ],
        vec![],
    ];
    let version = test_version(levels, vec![0.0, 0.0]);

    let mut probed = Vec::new();
    let result = version
        .get(b"g", 10, |meta| {
            probed.push(meta.sst_id);
            Ok(LookupResult::NotFound)
        })
        .unwrap();
    assert_eq!(result, LookupResult::NotFound);
    assert_eq!(probed, vec![3, 2, 1]);

    // a conclusive result stops the walk.
    let mut probed = Vec::new();
    let result = version
        .get(b"g", 10, |meta| {
            probed.push(meta.sst_id);
            if meta.sst_id == 2 {
                Ok(LookupResult::Put(Bytes::from_static(b"v")))
            } else {
                Ok(LookupResult::NotFound)
            }
        })
        .unwrap();
    assert_eq!(result, LookupResult::Put(Bytes::from_static(b"v")));
    assert_eq!(probed, vec![3, 2]);
}

#[test]
fn test_get_binary_searches_deep_levels() {
    let levels = vec![
        vec![],
        vec![
            meta(10, 1, b"a", b"c"),
            meta(11, 1, b"f", b"j"),
            meta(12, 1, b"m", b"p"),
        ],
    ];
    let version = test_version(levels, vec![0.0, 0.0]);

    let mut probed = Vec::new();
    version
        .get(b"h", 10, |meta| {
            probed.push(meta.sst_id);
            Ok(LookupResult::NotFound)
        })
        .unwrap();
    assert_eq!(probed, vec![11]);

    // gaps between files probe nothing.
    let mut probed = Vec::new();
    let result = version
        .get(b"e", 10, |meta| {
            probed.push(meta.sst_id);
            Ok(LookupResult::NotFound)
        })
        .unwrap();
    assert_eq!(result, LookupResult::NotFound);
    assert!(probed.is_empty());
}

#[test]
fn test_too_many_open_files_is_conclusive() {
    let levels = vec![vec![meta(1, 0, b"a", b"z"), meta(2, 0, b"a", b"z")]];
    let version = test_version(levels, vec![0.0]);
    let mut probes = 0;
    let result = version
        .get(b"k", 10, |_| {
            probes += 1;
            Ok(LookupResult::TooManyOpenFiles)
        })
        .unwrap();
    assert_eq!(result, LookupResult::TooManyOpenFiles);
    assert_eq!(probes, 1);
}

#[test]
fn test_pick_level_ties_go_low() {
    let version = test_version(vec![vec![], vec![], vec![]], vec![1.5, 1.5, 0.5]);
    assert!(version.need_compaction());
    assert_eq!(version.pick_level_to_compact(), Some(0));

    let version = test_version(vec![vec![], vec![], vec![]], vec![0.5, 0.9, 0.0]);
    assert!(!version.need_compaction());
}

#[test]
fn test_apply_empty_edit_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, gc_rx) = open_manager(&dir);

    let mut edit = VersionEdit::default();
    edit.add_file(1, 0, 100, b"a".to_vec(), b"m".to_vec());
    edit.next_sst_id = 2;
    manager.apply_edit(&edit).unwrap();

    let before = manager.acquire_latest();
    let empty = VersionEdit {
        next_sst_id: 2,
        ..Default::default()
    };
    let after = manager.apply_edit(&empty).unwrap();

    assert!(after.version_id() > before.version_id());
    assert_eq!(before.levels().len(), after.levels().len());
    for (a, b) in before.levels().iter().zip(after.levels().iter()) {
        let a_ids: Vec<u64> = a.iter().map(|m| m.sst_id).collect();
        let b_ids: Vec<u64> = b.iter().map(|m| m.sst_id).collect();
        assert_eq!(a_ids, b_ids);
    }
    assert_eq!(before.level_scores(), after.level_scores());
    drop(before);
    drain_gc(&manager, &gc_rx);
}

#[test]
fn test_deep_levels_stay_sorted_and_disjoint() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, gc_rx) = open_manager(&dir);

    let mut edit = VersionEdit::default();
    edit.add_file(5, 1, 100, b"m".to_vec(), b"p".to_vec());
    edit.add_file(6, 1, 100, b"a".to_vec(), b"c".to_vec());
    manager.apply_edit(&edit).unwrap();

    let mut edit = VersionEdit::default();
    edit.add_file(7, 1, 100, b"f".to_vec(), b"j".to_vec());
    manager.apply_edit(&edit).unwrap();
    drain_gc(&manager, &gc_rx);

    let latest = manager.acquire_latest();
    let level1 = &latest.levels()[1];
    let ids: Vec<u64> = level1.iter().map(|m| m.sst_id).collect();
    assert_eq!(ids, vec![6, 7, 5]);
    for window in level1.windows(2) {
        assert!(window[0].largest_key < window[1].smallest_key);
    }
}

#[test]
fn test_refcounts_follow_version_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, gc_rx) = open_manager(&dir);

    let mut edit = VersionEdit::default();
    edit.add_file(1, 0, 100, b"a".to_vec(), b"m".to_vec());
    manager.apply_edit(&edit).unwrap();
    drain_gc(&manager, &gc_rx);

    let pinned = manager.acquire_latest();
    let file = pinned.levels()[0][0].clone();
    assert_eq!(file.ref_count.load(Ordering::Acquire), 1);

    // drop the file from the latest version while an old version pins it.
    let mut edit = VersionEdit::default();
    edit.delete_file(1, 0);
    manager.apply_edit(&edit).unwrap();
    drain_gc(&manager, &gc_rx);
    assert_eq!(file.ref_count.load(Ordering::Acquire), 1);
    assert_eq!(manager.live_old_versions(), 1);

    // releasing the pin retires the old version and zeroes the file.
    drop(pinned);
    drain_gc(&manager, &gc_rx);
    assert_eq!(file.ref_count.load(Ordering::Acquire), 0);
    assert_eq!(manager.live_old_versions(), 0);
}
