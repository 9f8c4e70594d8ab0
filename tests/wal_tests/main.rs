//! WAL Tests
//!
//! Entry framing, segment files, the segment store's append/read paths,
//! startup recovery, hard state and compaction.

mod reader_tests;
mod recovery_tests;

use std::path::{Path, PathBuf};

use shardstore::config::{Config, WalSyncStrategy};
use shardstore::wal::{LogEntry, LogSegmentStore};

pub const SHARD: u64 = 7;

// =============================================================================
// Helper Functions
// =============================================================================

/// Small segments and cache so rotation and disk reads are easy to reach
pub fn small_config(dir: &Path, capacity: u32) -> Config {
    Config::builder()
        .data_dir(dir)
        .shard_id(SHARD)
        .segment_capacity(capacity)
        .entry_cache_capacity(4)
        .segment_cache_capacity(2)
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .build()
}

pub fn open_log(dir: &Path, capacity: u32) -> LogSegmentStore {
    LogSegmentStore::open(&small_config(dir, capacity)).unwrap()
}

/// Entries with index in `[lo, hi)`, term 1, payload naming the index
pub fn make_entries(lo: u64, hi: u64) -> Vec<LogEntry> {
    (lo..hi)
        .map(|i| LogEntry::new(i, 1, format!("entry-{}", i).into_bytes()))
        .collect()
}

pub fn indices(entries: &[LogEntry]) -> Vec<u64> {
    entries.iter().map(|e| e.index).collect()
}

/// Names of the shard's files in the directory, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn path_of(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}
