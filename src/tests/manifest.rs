use std::fs;

use tempfile::tempdir;

use crate::error::Error;
use crate::manifest::Manifest;
use crate::version::VersionEdit;

fn sample_edit(next_sst_id: u64) -> VersionEdit {
    let mut edit = VersionEdit {
        next_sst_id,
        ..Default::default()
    };
    edit.add_file(next_sst_id - 1, 0, 4096, b"aaa".to_vec(), b"zzz".to_vec());
    edit.delete_file(1, 0);
    edit
}

#[test]
fn test_append_then_recover() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("MANIFEST");

    let manifest = Manifest::create(&path).unwrap();
    let edits: Vec<VersionEdit> = (2..6).map(sample_edit).collect();
    for edit in &edits {
        manifest.add_record(edit).unwrap();
    }
    drop(manifest);

    let (_, recovered) = Manifest::recover(&path).unwrap();
    assert_eq!(recovered, edits);
}

#[test]
fn test_recover_empty_manifest() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("MANIFEST");
    Manifest::create(&path).unwrap();
    let (_, recovered) = Manifest::recover(&path).unwrap();
    assert!(recovered.is_empty());
}

#[test]
fn test_truncated_tail_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("MANIFEST");
    let manifest = Manifest::create(&path).unwrap();
    manifest.add_record(&sample_edit(2)).unwrap();
    drop(manifest);

    let raw = fs::read(&path).unwrap();
    fs::write(&path, &raw[..raw.len() - 3]).unwrap();
    assert!(matches!(
        Manifest::recover(&path),
        Err(Error::CorruptManifest(_))
    ));
}

#[test]
fn test_flipped_payload_byte_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("MANIFEST");
    let manifest = Manifest::create(&path).unwrap();
    manifest.add_record(&sample_edit(2)).unwrap();
    drop(manifest);

    let mut raw = fs::read(&path).unwrap();
    raw[6] ^= 0xff;
    fs::write(&path, &raw).unwrap();
    assert!(matches!(
        Manifest::recover(&path),
        Err(Error::CorruptManifest(_))
    ));
}

#[test]
fn test_create_refuses_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("MANIFEST");
    Manifest::create(&path).unwrap();
    assert!(Manifest::create(&path).is_err());
}
