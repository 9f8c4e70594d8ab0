//! WAL Entry definitions
//!
//! Defines replicated log entries and their on-disk framing.
//!
//! ```text
//! ┌───────────┬──────────┬──────────┬──────────┬───────────┬────────┐
//! │ CRC32 (4) │ Size (4) │ Type (1) │ Term (8) │ Index (8) │  Data  │
//! └───────────┴──────────┴──────────┴──────────┴───────────┴────────┘
//! ```
//!
//! `Size` is the data length; the CRC covers every byte after itself,
//! data included.

use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Entry header: crc (4) + data size (4) + type (1) + term (8) + index (8)
pub const ENTRY_HEAD_SIZE: usize = 4 + 4 + 1 + 8 + 8;

/// `max_bytes` value that disables read truncation
pub const NO_LIMIT: u64 = u64::MAX;

/// Kind of replicated entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryType {
    /// State machine command
    Normal = 0,
    /// Membership change, consumed by the consensus layer
    ConfChange = 1,
}

impl EntryType {
    /// Convert from u8, returns None for invalid values
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(EntryType::Normal),
            1 => Some(EntryType::ConfChange),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single replicated log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Position in the replicated log, starting at 1
    pub index: u64,

    /// Consensus term the entry was proposed in
    pub term: u64,

    pub entry_type: EntryType,

    /// Opaque payload
    pub data: Bytes,
}

impl LogEntry {
    /// A normal (state machine) entry
    pub fn new(index: u64, term: u64, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            term,
            entry_type: EntryType::Normal,
            data: data.into(),
        }
    }

    /// A membership change entry
    pub fn conf_change(index: u64, term: u64, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            term,
            entry_type: EntryType::ConfChange,
            data: data.into(),
        }
    }

    /// Bytes the entry occupies on disk, header included
    pub fn encoded_size(&self) -> u64 {
        (ENTRY_HEAD_SIZE + self.data.len()) as u64
    }
}

/// Decoded entry header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub checksum: u32,
    pub size: u32,
    pub entry_type: u8,
    pub term: u64,
    pub index: u64,
}

impl EntryHeader {
    /// Parse the first `ENTRY_HEAD_SIZE` bytes of `buf`
    pub fn decode(buf: &[u8]) -> Self {
        let mut src = &buf[..ENTRY_HEAD_SIZE];
        Self {
            checksum: src.get_u32_le(),
            size: src.get_u32_le(),
            entry_type: src.get_u8(),
            term: src.get_u64_le(),
            index: src.get_u64_le(),
        }
    }
}

/// Write the header for `entry` into `out[..ENTRY_HEAD_SIZE]`
pub fn encode_header(entry: &LogEntry, out: &mut [u8]) -> Result<()> {
    if entry.data.len() > u32::MAX as usize {
        return Err(StoreError::SizeLimitExceeded {
            what: "log entry data",
            limit: u32::MAX as u64,
            got: entry.data.len() as u64,
        });
    }
    if out.len() < ENTRY_HEAD_SIZE {
        return Err(StoreError::OutOfBuffer {
            need: ENTRY_HEAD_SIZE as u32,
            got: out.len(),
        });
    }

    {
        let mut dst = &mut out[4..ENTRY_HEAD_SIZE];
        dst.put_u32_le(entry.data.len() as u32);
        dst.put_u8(entry.entry_type.as_u8());
        dst.put_u64_le(entry.term);
        dst.put_u64_le(entry.index);
    }
    let checksum = entry_checksum(&out[4..ENTRY_HEAD_SIZE], &entry.data);
    (&mut out[..4]).put_u32_le(checksum);
    Ok(())
}

/// CRC over the header fields after the checksum, then the data
pub fn entry_checksum(header_fields: &[u8], data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_fields);
    hasher.update(data);
    hasher.finalize()
}

/// Accumulates entries for a read under a byte budget
#[derive(Debug)]
pub(crate) struct EntryBatch {
    entries: Vec<LogEntry>,
    bytes: u64,
    max_bytes: u64,
    full: bool,
}

impl EntryBatch {
    pub(crate) fn new(max_bytes: u64) -> Self {
        Self {
            entries: Vec::new(),
            bytes: 0,
            max_bytes,
            full: false,
        }
    }

    /// Add the next entry; returns false once the budget is exhausted
    pub(crate) fn push(&mut self, entry: LogEntry) -> bool {
        if self.full {
            return false;
        }
        let size = entry.encoded_size();
        if !self.entries.is_empty()
            && self.max_bytes != NO_LIMIT
            && self.bytes.saturating_add(size) > self.max_bytes
        {
            self.full = true;
            return false;
        }
        self.bytes = self.bytes.saturating_add(size);
        self.entries.push(entry);
        true
    }

    pub(crate) fn is_full(&self) -> bool {
        self.full
    }

    pub(crate) fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}
