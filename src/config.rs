use std::path::PathBuf;

use crate::error::{Error, Result};

const MIB: usize = 1024 * 1024;
const KIB: usize = 1024;

/// Engine tunables. Plain data; validation happens once at `Db::open`.
#[derive(Clone, Debug)]
pub struct Config {
    /// Rotate the mutable memtable once its byte size reaches this limit.
    pub memtable_size_limit: usize,
    /// Back-pressure threshold on unflushed immutable memtables.
    pub max_immutables: usize,
    /// Target uncompressed block size inside an SST.
    pub block_size: usize,
    /// Number of LSM levels.
    pub num_levels: usize,
    /// L0 file count at which level 0 scores 1.0.
    pub l0_compaction_trigger: usize,
    /// Directory holding SSTs and the manifest.
    pub data_path: PathBuf,
    /// Max table readers pinned by the table cache.
    pub table_cache_capacity: usize,
    /// Max decoded blocks pinned by the block cache.
    pub block_cache_capacity: usize,
    /// Compaction output files target `block_size * blocks_per_file` bytes.
    pub blocks_per_file: usize,
    /// Worker threads shared by flush and compaction jobs.
    pub worker_threads: usize,
}

impl Config {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            memtable_size_limit: 4 * MIB,
            max_immutables: 2,
            block_size: 4 * KIB,
            num_levels: 7,
            l0_compaction_trigger: 4,
            data_path: data_path.into(),
            table_cache_capacity: 128,
            block_cache_capacity: 1024,
            blocks_per_file: 512,
            worker_threads: 4,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.memtable_size_limit < 4 * MIB || self.memtable_size_limit > 64 * MIB {
            return Err(Error::InvalidConfig(format!(
                "memtable_size_limit {} outside [4MiB, 64MiB]",
                self.memtable_size_limit
            )));
        }
        if self.max_immutables < 1 || self.max_immutables > 16 {
            return Err(Error::InvalidConfig(format!(
                "max_immutables {} outside [1, 16]",
                self.max_immutables
            )));
        }
        if self.block_size < 4 * KIB || self.block_size > 32 * KIB {
            return Err(Error::InvalidConfig(format!(
                "block_size {} outside [4KiB, 32KiB]",
                self.block_size
            )));
        }
        if self.num_levels < 1 || self.num_levels > 7 {
            return Err(Error::InvalidConfig(format!(
                "num_levels {} outside [1, 7]",
                self.num_levels
            )));
        }
        if self.l0_compaction_trigger < 1 || self.l0_compaction_trigger > 8 {
            return Err(Error::InvalidConfig(format!(
                "l0_compaction_trigger {} outside [1, 8]",
                self.l0_compaction_trigger
            )));
        }
        if self.data_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("data_path is empty".to_string()));
        }
        if self.table_cache_capacity < 1 {
            return Err(Error::InvalidConfig(
                "table_cache_capacity must be >= 1".to_string(),
            ));
        }
        if self.block_cache_capacity < 1 {
            return Err(Error::InvalidConfig(
                "block_cache_capacity must be >= 1".to_string(),
            ));
        }
        if self.blocks_per_file < 1 {
            return Err(Error::InvalidConfig(
                "blocks_per_file must be >= 1".to_string(),
            ));
        }
        if self.worker_threads < 1 {
            return Err(Error::InvalidConfig(
                "worker_threads must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Target output file size for flush and compaction.
    pub(crate) fn target_file_size(&self) -> usize {
        self.block_size * self.blocks_per_file
    }

    /// Byte budget for a level >= 1: 10 MiB at L1, 10x per level below.
    pub(crate) fn max_bytes_for_level(&self, level: usize) -> u64 {
        debug_assert!(level >= 1);
        let mut budget = 10 * MIB as u64;
        for _ in 1..level {
            budget = budget.saturating_mul(10);
        }
        budget
    }
}
