//! Engine Tests

mod snapshot_tests;

use std::path::Path;

use shardstore::config::{Config, WalSyncStrategy};
use shardstore::engine::Engine;
use shardstore::protocol::{encode_command, Command};
use shardstore::wal::{HardState, LogEntry};

// =============================================================================
// Helper Functions
// =============================================================================

pub fn engine_config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .segment_capacity(8)
        .entry_cache_capacity(4)
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .build()
}

pub fn open_engine(dir: &Path) -> Engine {
    Engine::open(engine_config(dir)).unwrap()
}

pub fn set_entry(index: u64, term: u64, key: &str, value: &str) -> LogEntry {
    let cmd = Command::set(key.as_bytes().to_vec(), value.as_bytes().to_vec());
    LogEntry::new(index, term, encode_command(&cmd))
}

pub fn del_entry(index: u64, term: u64, key: &str) -> LogEntry {
    LogEntry::new(index, term, encode_command(&Command::del(key.as_bytes().to_vec())))
}

/// `count` SET entries from `first`, writing `key{i}` = `value{i}`
pub fn set_entries(first: u64, count: u64) -> Vec<LogEntry> {
    (first..first + count)
        .map(|i| set_entry(i, 1, &format!("key{:04}", i), &format!("value{}", i)))
        .collect()
}

pub fn commit(engine: &Engine, index: u64) {
    engine
        .set_hard_state(HardState {
            term: 1,
            vote: 1,
            commit: index,
        })
        .unwrap();
}
