//! Write-Ahead Log (WAL) Module
//!
//! Durable storage for a shard's replicated log and consensus hard state.
//!
//! ## Responsibilities
//! - Append contiguous batches of log entries, rotating fixed-capacity segments
//! - Serve index-range reads from a hot cache or the segment files
//! - CRC32 checksums on entries, metadata tables and hard state
//! - Validate the whole directory at startup before trusting it
//! - Persist the hard state across a small ring of files
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── log_7.0000000001-0000002000   rotated, read-only
//!   ├── log_7.0000002001-0000004000   rotated, read-only
//!   ├── log_7.current                 accepting appends
//!   ├── hs_7.0                        hard state, even sequence ids
//!   └── hs_7.1                        hard state, odd sequence ids
//! ```
//!
//! Segment `p` covers indices `[p·N + 1, (p+1)·N]` for capacity `N`.

mod cache;
mod entry;
mod hard_state;
mod log_store;
mod reader;
mod recovery;
mod segment;
mod writer;

pub use entry::{
    encode_header, entry_checksum, EntryHeader, EntryType, LogEntry, ENTRY_HEAD_SIZE, NO_LIMIT,
};
pub use hard_state::{
    decode_hard_state, encode_hard_state, HardState, SnapshotMeta, HARD_STATE_BODY_SIZE,
    HARD_STATE_FILE_SIZE, HARD_STATE_HEAD_SIZE,
};
pub use log_store::LogSegmentStore;
pub use reader::{read_meta, SegmentReader};
pub use recovery::{scan_log, CurrentSegment, LogScan, SegmentInfo};
pub use segment::{
    current_file_name, hard_state_file_name, log_file_prefix, meta_region_size,
    parse_segment_file_name, segment_file_name, segment_range, MetaEntry, SegmentMeta, LOG_MAGIC,
    META_ENTRY_SIZE, META_HEAD_SIZE,
};
