//! Engine Module
//!
//! Ties one shard's persistence together: the replicated log, the hard state
//! and the in-memory store the committed entries are applied to.
//!
//! ## Responsibilities
//! - Recover the log and hard state on startup
//! - Append entries and persist hard state on behalf of consensus
//! - Apply committed entries to the store in bounded batches
//! - Produce and install whole-store snapshots, and compact the log behind them

use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::protocol::decode_command;
use crate::state_machine::StateMachine;
use crate::store::KvStore;
use crate::wal::{EntryType, HardState, LogEntry, LogSegmentStore, SnapshotMeta};

/// One shard's storage engine
///
/// ## Concurrency Model
///
/// - **Log writes** (append/compact): serialized inside `LogSegmentStore`
/// - **Apply / snapshot / install**: serialized by `applied`, so a snapshot
///   always matches the index it is labelled with
/// - **Store reads** (get/range): go straight to the store's `RwLock`
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Applied state machine
    store: KvStore,

    /// Replicated log and hard state
    log: LogSegmentStore,

    /// Index and term of the last entry applied to `store`
    applied: Mutex<SnapshotMeta>,
}

impl Engine {
    /// Open or create a shard with the given config
    ///
    /// On startup:
    /// 1. Recover the log directory (fails on any inconsistency)
    /// 2. Load the newest valid hard state
    /// 3. Start with an empty store; committed entries are re-applied from
    ///    the log or a snapshot is installed
    pub fn open(config: Config) -> Result<Self> {
        let log = LogSegmentStore::open(&config)?;

        info!(
            shard_id = config.shard_id,
            first_index = log.first_index(),
            last_index = log.last_index(),
            commit = log.hard_state().commit,
            "opened engine"
        );

        Ok(Self {
            config,
            store: KvStore::new(),
            log,
            applied: Mutex::new(SnapshotMeta::default()),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Append entries to the log
    pub fn append(&self, entries: &[LogEntry]) -> Result<()> {
        self.log.store_entries(entries)
    }

    /// Persist the consensus hard state
    pub fn set_hard_state(&self, state: HardState) -> Result<()> {
        self.log.set_hard_state(state)
    }

    /// Apply every committed entry not applied yet, returning the new
    /// applied index.
    ///
    /// Entries are read in batches of at most `max_apply_bytes`. If the next
    /// entry to apply was compacted away, `IndexCompacted` is returned and the
    /// caller has to install a snapshot instead.
    pub fn apply_committed(&self) -> Result<u64> {
        let mut applied = self.applied.lock();
        let commit = self.log.hard_state().commit.min(self.log.last_index());

        while applied.index < commit {
            let lo = applied.index + 1;
            let (entries, compacted) =
                self.log
                    .entries(lo, commit + 1, self.config.max_apply_bytes)?;
            if compacted {
                return Err(StoreError::IndexCompacted {
                    shard_id: self.config.shard_id,
                    index: lo,
                    first: self.log.first_index(),
                });
            }

            for entry in entries {
                if entry.entry_type == EntryType::Normal && !entry.data.is_empty() {
                    let command = decode_command(&entry.data)?;
                    self.store.apply(command, entry.index)?;
                }
                *applied = SnapshotMeta {
                    index: entry.index,
                    term: entry.term,
                };
            }
            debug!(
                shard_id = self.config.shard_id,
                applied = applied.index,
                commit,
                "applied batch"
            );
        }

        Ok(applied.index)
    }

    /// Export the store together with the position it reflects
    pub fn snapshot(&self) -> Result<(Vec<u8>, SnapshotMeta)> {
        let applied = self.applied.lock();
        let bytes = self.store.snapshot()?;
        Ok((bytes, *applied))
    }

    /// Replace the store with a snapshot taken at `meta`.
    ///
    /// The snapshot is decoded in full first, then the log is compacted
    /// behind it (or restarted if the snapshot is ahead of it). Only after
    /// both succeed are the store and the applied position swapped, so an
    /// error leaves them as they were.
    pub fn install_snapshot(&self, snapshot: &[u8], meta: SnapshotMeta) -> Result<()> {
        if meta.is_empty() {
            return Err(StoreError::EmptySnapshotMeta);
        }

        let mut applied = self.applied.lock();
        let decoded = self.store.decode_snapshot(snapshot)?;
        self.log.compact(meta)?;
        self.store.install_decoded(decoded);
        *applied = meta;

        info!(
            shard_id = self.config.shard_id,
            index = meta.index,
            term = meta.term,
            records = self.store.len(),
            "installed snapshot"
        );
        Ok(())
    }

    /// Drop log segments covered by a snapshot at `meta`
    pub fn compact(&self, meta: SnapshotMeta) -> Result<()> {
        self.log.compact(meta)
    }

    /// Get a value from the applied store
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.store.get(key)
    }

    /// Sync the log and release its files
    pub fn close(self) -> Result<()> {
        let applied = self.applied.into_inner();
        self.log.close()?;
        info!(shard_id = self.config.shard_id, applied = applied.index, "closed engine");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn applied_index(&self) -> u64 {
        self.applied.lock().index
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    pub fn log(&self) -> &LogSegmentStore {
        &self.log
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
