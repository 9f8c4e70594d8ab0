//! Store Module
//!
//! In-memory ordered key-value store applied by the replicated state machine.
//!
//! ## Responsibilities
//! - Point get/set/delete and ordered range scans
//! - Split a store in two at a key (shard split)
//! - Export/import the whole store as a checksummed snapshot
//! - Track the packed size of the store without scanning it
//!
//! ## Data Structure Choice
//! A `BTreeSet<KeyRecord>` behind a `parking_lot::RwLock`. Records order by
//! key bytes and borrow as `[u8]`, so lookups take raw keys directly.

mod record;
mod snapshot;
mod table;

pub use record::{
    record_pack_size, KeyRecord, MIN_RECORD_SIZE, RECORD_HEAD_SIZE, RECORD_TAIL_SIZE,
};
pub use snapshot::{
    decode_store, encode_store, store_pack_size, DecodeFn, DecodedStore, SnapshotEncoder,
    DECODERS, MAX_PAYLOAD_SIZE, MIN_STORE_SIZE, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
    SNAPSHOT_VERSION_0, STORE_HEAD_SIZE, STORE_TAIL_SIZE,
};
pub use table::KvStore;
