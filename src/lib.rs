//! # shardstore
//!
//! Persistence core of one shard of a replicated key-value database:
//! - Ordered in-memory store applied from committed log entries
//! - Checksummed, versioned whole-store snapshots
//! - Segmented write-ahead log with a hot entry cache
//! - Hard state rotated across a ring of files
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                consensus (external caller)                  │
//! └───────────┬──────────────────────────────────┬──────────────┘
//!             │ append / hard state              │ apply / snapshot
//! ┌───────────▼────────────┐          ┌──────────▼──────────────┐
//! │    LogSegmentStore     │          │        KvStore          │
//! │  segments + hot cache  │          │  BTreeSet<KeyRecord>    │
//! │  + hard-state ring     │          │  + pack size counter    │
//! └───────────┬────────────┘          └──────────┬──────────────┘
//!             │                                  │
//!             ▼                                  ▼
//!   log_<shard>.<first>-<last>          snapshot bytes
//!   log_<shard>.current                 (SnapshotCodec)
//!   hs_<shard>.<slot>
//! ```
//!
//! [`Engine`] wires both halves together for a single shard.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod buffer;
pub mod config;
pub mod error;

pub mod engine;
pub mod protocol;
pub mod state_machine;
pub mod store;
pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use buffer::{BufferPool, PooledBuffer};
pub use config::{Config, WalSyncStrategy};
pub use engine::Engine;
pub use error::{ErrorReport, Result, StoreError};
pub use state_machine::StateMachine;
pub use store::KvStore;
pub use wal::{EntryType, HardState, LogEntry, LogSegmentStore, SnapshotMeta, NO_LIMIT};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of shardstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
