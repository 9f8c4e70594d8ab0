//! Configuration for shardstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Default number of entries a segment file can hold
pub const DEFAULT_SEGMENT_CAPACITY: u32 = 8192;

/// Default number of recent entries kept in memory
pub const DEFAULT_ENTRY_CACHE_CAPACITY: usize = 128;

/// Default number of rotated segment metadata tables kept loaded
pub const DEFAULT_SEGMENT_CACHE_CAPACITY: usize = 5;

/// Default number of hard-state files in the ring
pub const DEFAULT_HARD_STATE_RING_SIZE: u32 = 2;

/// Main configuration for a shard's persistence layer
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the shard's files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── log_<shard>.<first>-<last>   (rotated segments)
    ///     ├── log_<shard>.current          (active segment)
    ///     └── hs_<shard>.<slot>            (hard-state ring)
    pub data_dir: PathBuf,

    /// Shard this directory belongs to
    pub shard_id: u64,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Entries per segment file (fixed for the lifetime of a log)
    pub segment_capacity: u32,

    /// Recent entries kept in the in-memory hot cache
    pub entry_cache_capacity: usize,

    /// Rotated segment metadata tables kept loaded for reads
    pub segment_cache_capacity: usize,

    /// Hard-state files rotated through
    pub hard_state_ring_size: u32,

    /// Sync strategy: when the active segment is fsynced
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // Apply Configuration
    // -------------------------------------------------------------------------
    /// Byte budget per batch when applying committed entries
    pub max_apply_bytes: u64,
}

/// WAL sync strategy
///
/// Entries are handed to the OS after every batch regardless of strategy.
/// The strategy only decides when the data is fsynced and the segment's
/// metadata table is rewritten, which is the point an entry survives a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every batch (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced entries (balanced durability/performance)
    EveryNEntries { count: usize },

    /// fsync only on explicit `sync()` or `close()`
    Manual,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./shardstore_data"),
            shard_id: 1,
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            entry_cache_capacity: DEFAULT_ENTRY_CACHE_CAPACITY,
            segment_cache_capacity: DEFAULT_SEGMENT_CACHE_CAPACITY,
            hard_state_ring_size: DEFAULT_HARD_STATE_RING_SIZE,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries {
                count: DEFAULT_ENTRY_CACHE_CAPACITY,
            },
            max_apply_bytes: 4 * 1024 * 1024, // 4 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the WAL cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.segment_capacity == 0 {
            return Err(StoreError::Config(
                "segment_capacity must be at least 1".to_string(),
            ));
        }
        if self.hard_state_ring_size < 2 {
            return Err(StoreError::Config(format!(
                "hard_state_ring_size must be at least 2, got {}",
                self.hard_state_ring_size
            )));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(StoreError::Config(
                "EveryNEntries count must be at least 1".to_string(),
            ));
        }
        if self.max_apply_bytes == 0 {
            return Err(StoreError::Config(
                "max_apply_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the shard id
    pub fn shard_id(mut self, shard_id: u64) -> Self {
        self.config.shard_id = shard_id;
        self
    }

    /// Set the number of entries per segment file
    pub fn segment_capacity(mut self, capacity: u32) -> Self {
        self.config.segment_capacity = capacity;
        self
    }

    /// Set the number of recent entries kept in memory
    pub fn entry_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.entry_cache_capacity = capacity;
        self
    }

    /// Set the number of rotated segment metadata tables kept loaded
    pub fn segment_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.segment_cache_capacity = capacity;
        self
    }

    /// Set the number of hard-state files in the ring
    pub fn hard_state_ring_size(mut self, size: u32) -> Self {
        self.config.hard_state_ring_size = size;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the byte budget per apply batch
    pub fn max_apply_bytes(mut self, bytes: u64) -> Self {
        self.config.max_apply_bytes = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
