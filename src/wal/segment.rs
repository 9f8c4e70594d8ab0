//! Segment files: naming and metadata table
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Meta Header (24 bytes)                                        │
//! │   Magic (4) | CRC (4) | ShardId (8) | Capacity (4) | Count (4)│
//! ├───────────────────────────────────────────────────────────────┤
//! │ Meta Table (Capacity × 24 bytes, first Count in use)          │
//! │   [Index (8)][Term (8)][Offset (8)]                           │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Data Region                                                   │
//! │   [Entry header (25)][Data] ... referenced by Offset          │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The CRC covers the header after itself and the `Count` used table rows.

use std::path::Path;

use bytes::{Buf, BufMut};

use crate::error::{Result, StoreError};

use super::entry::ENTRY_HEAD_SIZE;

/// Magic number of segment and hard-state files
pub const LOG_MAGIC: u32 = 0x1EEE;

/// Meta header: magic + crc + shard id + capacity + entry count
pub const META_HEAD_SIZE: usize = 4 + 4 + 8 + 4 + 4;

/// Meta table row: index + term + offset
pub const META_ENTRY_SIZE: usize = 8 + 8 + 8;

/// Bytes reserved at the start of a segment for the metadata table
pub fn meta_region_size(capacity: u32) -> u64 {
    META_HEAD_SIZE as u64 + capacity as u64 * META_ENTRY_SIZE as u64
}

// =============================================================================
// File Naming
// =============================================================================

/// `log_<shard>.<first>-<last>` with 10-digit lowercase hex indices
pub fn segment_file_name(shard_id: u64, first_index: u64, last_index: u64) -> String {
    format!("log_{}.{:010x}-{:010x}", shard_id, first_index, last_index)
}

/// Name of the segment currently accepting appends
pub fn current_file_name(shard_id: u64) -> String {
    format!("log_{}.current", shard_id)
}

/// Prefix shared by every log file of a shard
pub fn log_file_prefix(shard_id: u64) -> String {
    format!("log_{}.", shard_id)
}

/// `hs_<shard>.<seq mod ring>` in lowercase hex
pub fn hard_state_file_name(shard_id: u64, seq_id: u64, ring_size: u32) -> String {
    format!("hs_{}.{:x}", shard_id, seq_id % ring_size as u64)
}

/// Parse `(shard_id, first_index, last_index)` from a rotated segment name.
///
/// Only names that format back to exactly the same string are accepted.
pub fn parse_segment_file_name(name: &str) -> Result<(u64, u64, u64)> {
    let not_match = || StoreError::FileNameNotMatch(name.to_string());

    let rest = name.strip_prefix("log_").ok_or_else(not_match)?;
    let (shard, range) = rest.split_once('.').ok_or_else(not_match)?;
    let (first, last) = range.split_once('-').ok_or_else(not_match)?;

    let shard_id: u64 = shard.parse().map_err(|_| not_match())?;
    let first_index = u64::from_str_radix(first, 16).map_err(|_| not_match())?;
    let last_index = u64::from_str_radix(last, 16).map_err(|_| not_match())?;

    if segment_file_name(shard_id, first_index, last_index) != name {
        return Err(not_match());
    }
    Ok((shard_id, first_index, last_index))
}

/// Index range `[first, last]` of the segment that holds `index` (>= 1)
pub fn segment_range(index: u64, capacity: u32) -> (u64, u64) {
    let capacity = capacity as u64;
    let pos = (index.max(1) - 1) / capacity;
    (pos * capacity + 1, (pos + 1) * capacity)
}

// =============================================================================
// Metadata Table
// =============================================================================

/// One row of the metadata table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaEntry {
    pub index: u64,
    pub term: u64,
    /// File offset of the entry header
    pub offset: u64,
}

/// Decoded metadata table of one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMeta {
    pub shard_id: u64,
    pub capacity: u32,
    pub entries: Vec<MetaEntry>,
}

impl SegmentMeta {
    pub fn new(shard_id: u64, capacity: u32) -> Self {
        Self {
            shard_id,
            capacity,
            entries: Vec::new(),
        }
    }

    /// Header plus the used table rows
    pub fn encoded_len(&self) -> usize {
        META_HEAD_SIZE + self.entries.len() * META_ENTRY_SIZE
    }

    pub fn first_index(&self) -> Option<u64> {
        self.entries.first().map(|e| e.index)
    }

    pub fn last_index(&self) -> Option<u64> {
        self.entries.last().map(|e| e.index)
    }

    /// Row for `index`, if this segment stores it
    pub fn get(&self, index: u64) -> Option<&MetaEntry> {
        let first = self.first_index()?;
        let pos = index.checked_sub(first)?;
        self.entries.get(pos as usize)
    }

    /// Encode into `out[..encoded_len()]`
    pub fn encode(&self, out: &mut [u8]) -> Result<usize> {
        let len = self.encoded_len();
        if out.len() < len {
            return Err(StoreError::OutOfBuffer {
                need: len as u32,
                got: out.len(),
            });
        }

        {
            let mut dst = &mut out[8..len];
            dst.put_u64_le(self.shard_id);
            dst.put_u32_le(self.capacity);
            dst.put_u32_le(self.entries.len() as u32);
            for entry in &self.entries {
                dst.put_u64_le(entry.index);
                dst.put_u64_le(entry.term);
                dst.put_u64_le(entry.offset);
            }
        }
        let checksum = crc32fast::hash(&out[8..len]);

        let mut dst = &mut out[..8];
        dst.put_u32_le(LOG_MAGIC);
        dst.put_u32_le(checksum);
        Ok(len)
    }

    /// `(capacity, count)` declared by a meta header, unvalidated
    pub fn declared_size(head: &[u8]) -> (u32, u32) {
        let mut src = &head[16..META_HEAD_SIZE];
        (src.get_u32_le(), src.get_u32_le())
    }

    /// Decode and validate a header followed by its used table rows.
    ///
    /// Checks the magic, the CRC, the count against the capacity, and that
    /// rows hold consecutive indices at increasing offsets inside the data
    /// region.
    pub fn decode(buf: &[u8], path: &Path) -> Result<Self> {
        if buf.len() < META_HEAD_SIZE {
            return Err(StoreError::LogFileIncomplete {
                path: path.to_path_buf(),
                detail: format!("meta header needs {} bytes, got {}", META_HEAD_SIZE, buf.len()),
            });
        }

        let mut src = buf;
        let magic = src.get_u32_le();
        if magic != LOG_MAGIC {
            return Err(StoreError::BadMagic {
                path: path.to_path_buf(),
                got: magic,
            });
        }
        let read = src.get_u32_le();
        let shard_id = src.get_u64_le();
        let capacity = src.get_u32_le();
        let count = src.get_u32_le();

        if count > capacity {
            return Err(bad_meta(
                path,
                format!("entry count {} exceeds capacity {}", count, capacity),
            ));
        }
        let len = META_HEAD_SIZE + count as usize * META_ENTRY_SIZE;
        if buf.len() < len {
            return Err(StoreError::LogFileIncomplete {
                path: path.to_path_buf(),
                detail: format!("meta table needs {} bytes, got {}", len, buf.len()),
            });
        }

        let calc = crc32fast::hash(&buf[8..len]);
        if read != calc {
            return Err(StoreError::CrcNotMatch {
                path: path.to_path_buf(),
                what: "meta table",
                read,
                calc,
            });
        }

        let data_start = meta_region_size(capacity);
        let mut entries: Vec<MetaEntry> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let entry = MetaEntry {
                index: src.get_u64_le(),
                term: src.get_u64_le(),
                offset: src.get_u64_le(),
            };
            match entries.last() {
                None if entry.offset < data_start => {
                    return Err(bad_meta(
                        path,
                        format!("entry {} offset {} inside meta region", entry.index, entry.offset),
                    ));
                }
                Some(prev) if entry.index != prev.index + 1 => {
                    return Err(bad_meta(
                        path,
                        format!("entry {} follows entry {}", entry.index, prev.index),
                    ));
                }
                Some(prev) if entry.offset < prev.offset + ENTRY_HEAD_SIZE as u64 => {
                    return Err(bad_meta(
                        path,
                        format!(
                            "entry {} offset {} overlaps previous entry",
                            entry.index, entry.offset
                        ),
                    ));
                }
                _ => {}
            }
            entries.push(entry);
        }

        Ok(Self {
            shard_id,
            capacity,
            entries,
        })
    }
}

pub(crate) fn bad_meta(path: &Path, detail: String) -> StoreError {
    StoreError::BadMeta {
        path: path.to_path_buf(),
        detail,
    }
}
