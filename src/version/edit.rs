use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One file added by an edit, with everything recovery needs to rebuild its
/// metadata.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddedFile {
    pub sst_id: u64,
    pub level: usize,
    pub file_size: u64,
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
}

/// A delta between two versions: files to add, files to drop, and the sst
/// id counter so recovery never re-issues an id. Serialized verbatim into
/// the manifest.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionEdit {
    pub next_sst_id: u64,
    pub added_files: Vec<AddedFile>,
    pub deleted_files: BTreeSet<(u64, usize)>,
}

impl VersionEdit {
    pub fn add_file(
        &mut self,
        sst_id: u64,
        level: usize,
        file_size: u64,
        smallest_key: Vec<u8>,
        largest_key: Vec<u8>,
    ) {
        self.added_files.push(AddedFile {
            sst_id,
            level,
            file_size,
            smallest_key,
            largest_key,
        });
    }

    pub fn delete_file(&mut self, sst_id: u64, level: usize) {
        self.deleted_files.insert((sst_id, level));
    }

    pub fn is_empty(&self) -> bool {
        self.added_files.is_empty() && self.deleted_files.is_empty()
    }
}
