//! WAL Recovery
//!
//! Scans a shard's log directory at startup and validates what it finds
//! before the store trusts any of it. The scan itself never modifies a file;
//! [`LogSegmentStore::open`](super::LogSegmentStore::open) applies its result.
//!
//! Recovery is all-or-nothing: a gap, an overlap, a corrupt metadata table or
//! a referenced entry that cannot be read fails the scan. The one thing that
//! is tolerated is data written to the current segment after its last sync,
//! which the metadata table never referenced.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::buffer::BufferPool;
use crate::error::{Result, StoreError};

use super::entry::ENTRY_HEAD_SIZE;
use super::reader::{read_meta, SegmentReader};
use super::segment::{
    bad_meta, current_file_name, log_file_prefix, meta_region_size, parse_segment_file_name,
    segment_range, SegmentMeta,
};

/// A rotated, read-only segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub range_first: u64,
    pub range_last: u64,
    /// First index actually stored; above `range_first` only for the
    /// earliest retained segment
    pub first_stored: u64,
    pub path: PathBuf,
}

/// The segment that was accepting appends when the log was last open
#[derive(Debug, Clone)]
pub struct CurrentSegment {
    pub path: PathBuf,
    pub meta: SegmentMeta,
    pub range_first: u64,
    pub range_last: u64,
    /// End of the last referenced entry
    pub write_offset: u64,
    pub file_len: u64,
}

impl CurrentSegment {
    /// Bytes past the last referenced entry, never synced
    pub fn unsynced_tail(&self) -> u64 {
        self.file_len.saturating_sub(self.write_offset)
    }
}

/// Validated view of a shard's log directory
#[derive(Debug, Clone, Default)]
pub struct LogScan {
    /// Rotated segments in index order
    pub sealed: Vec<SegmentInfo>,
    pub current: Option<CurrentSegment>,
}

impl LogScan {
    pub fn first_index(&self) -> Option<u64> {
        match self.sealed.first() {
            Some(info) => Some(info.first_stored),
            None => self.current.as_ref().and_then(|c| c.meta.first_index()),
        }
    }

    pub fn last_index(&self) -> Option<u64> {
        match self.current.as_ref().and_then(|c| c.meta.last_index()) {
            Some(last) => Some(last),
            None => self.sealed.last().map(|info| info.range_last),
        }
    }

    /// Range the next current segment must cover
    pub fn next_range(&self, capacity: u32) -> (u64, u64) {
        match self.sealed.last() {
            Some(info) => (info.range_last + 1, info.range_last + capacity as u64),
            None => segment_range(1, capacity),
        }
    }
}

/// Scan and validate every log file of `shard_id` under `dir`
pub fn scan_log(dir: &Path, shard_id: u64, capacity: u32) -> Result<LogScan> {
    let meta_pool = BufferPool::with_max_idle(meta_region_size(capacity) as usize, 1);
    let head_pool = BufferPool::with_max_idle(ENTRY_HEAD_SIZE, 1);

    let (mut ranges, current_path) = list_log_files(dir, shard_id, capacity)?;
    ranges.sort_by_key(|(first, _, _)| *first);
    check_contiguous(&ranges, shard_id)?;

    let mut scan = LogScan::default();
    for (pos, (range_first, range_last, path)) in ranges.into_iter().enumerate() {
        let info = check_sealed(
            path,
            shard_id,
            capacity,
            (range_first, range_last),
            pos == 0,
            &meta_pool,
            &head_pool,
        )?;
        scan.sealed.push(info);
    }

    if let Some(path) = current_path {
        let current = check_current(path, shard_id, capacity, &scan, &meta_pool, &head_pool)?;
        scan.current = Some(current);
    }

    debug!(
        shard_id,
        sealed = scan.sealed.len(),
        has_current = scan.current.is_some(),
        first_index = ?scan.first_index(),
        last_index = ?scan.last_index(),
        "scanned log directory"
    );
    Ok(scan)
}

type NamedRange = (u64, u64, PathBuf);

fn list_log_files(
    dir: &Path,
    shard_id: u64,
    capacity: u32,
) -> Result<(Vec<NamedRange>, Option<PathBuf>)> {
    let access = |source| StoreError::LogDirAccess {
        path: dir.to_path_buf(),
        source,
    };

    let prefix = log_file_prefix(shard_id);
    let current_name = current_file_name(shard_id);
    let mut ranges = Vec::new();
    let mut current = None;

    for dir_entry in fs::read_dir(dir).map_err(access)? {
        let dir_entry = dir_entry.map_err(access)?;
        let name = dir_entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&prefix) {
            continue;
        }

        let path = dir_entry.path();
        if name == current_name {
            current = Some(path);
            continue;
        }

        let (_, first, last) = parse_segment_file_name(name)?;
        if segment_range(first, capacity) != (first, last) {
            return Err(bad_meta(
                &path,
                format!("range [{}, {}] not aligned to capacity {}", first, last, capacity),
            ));
        }
        ranges.push((first, last, path));
    }
    Ok((ranges, current))
}

fn check_contiguous(ranges: &[NamedRange], shard_id: u64) -> Result<()> {
    for pair in ranges.windows(2) {
        let (_, prev_last, _) = &pair[0];
        let (next_first, _, next_path) = &pair[1];
        if *next_first <= *prev_last {
            return Err(StoreError::SegmentOverlap {
                shard_id,
                path: next_path.clone(),
                index: *next_first,
            });
        }
        if *next_first != prev_last + 1 {
            return Err(StoreError::SegmentGap {
                shard_id,
                after: *prev_last,
                next: *next_first,
            });
        }
    }
    Ok(())
}

fn check_sealed(
    path: PathBuf,
    shard_id: u64,
    capacity: u32,
    range: (u64, u64),
    earliest: bool,
    meta_pool: &BufferPool,
    head_pool: &BufferPool,
) -> Result<SegmentInfo> {
    let meta = read_meta(&path, shard_id, meta_pool)?;
    check_capacity(&meta, capacity, &path)?;

    let (Some(first), Some(last), Some(last_row)) =
        (meta.first_index(), meta.last_index(), meta.entries.last())
    else {
        return Err(StoreError::LogFileIncomplete {
            path,
            detail: "rotated segment holds no entries".to_string(),
        });
    };

    if last != range.1 {
        return Err(StoreError::LogFileIncomplete {
            path,
            detail: format!("entries end at {}, range ends at {}", last, range.1),
        });
    }
    if first < range.0 || (!earliest && first != range.0) {
        return Err(StoreError::LogFileIncomplete {
            path,
            detail: format!("entries start at {}, range starts at {}", first, range.0),
        });
    }

    SegmentReader::open(&path, shard_id)?.read_entry(last_row, head_pool)?;

    Ok(SegmentInfo {
        range_first: range.0,
        range_last: range.1,
        first_stored: first,
        path,
    })
}

fn check_current(
    path: PathBuf,
    shard_id: u64,
    capacity: u32,
    scan: &LogScan,
    meta_pool: &BufferPool,
    head_pool: &BufferPool,
) -> Result<CurrentSegment> {
    let meta = read_meta(&path, shard_id, meta_pool)?;
    check_capacity(&meta, capacity, &path)?;

    let (range_first, range_last) = match meta.first_index() {
        Some(first) => segment_range(first, capacity),
        None => scan.next_range(capacity),
    };
    if let Some(prev) = scan.sealed.last() {
        if range_first <= prev.range_last {
            return Err(StoreError::SegmentOverlap {
                shard_id,
                path,
                index: range_first,
            });
        }
        if range_first != prev.range_last + 1 {
            return Err(StoreError::SegmentGap {
                shard_id,
                after: prev.range_last,
                next: range_first,
            });
        }
        if meta.first_index().map_or(false, |first| first != range_first) {
            return Err(StoreError::LogFileIncomplete {
                path,
                detail: format!("current segment does not start at {}", range_first),
            });
        }
    }

    let mut write_offset = meta_region_size(capacity);
    let mut reader = SegmentReader::open(&path, shard_id)?;
    for row in &meta.entries {
        let entry = reader.read_entry(row, head_pool)?;
        write_offset = row.offset + entry.encoded_size();
    }

    let file_len = fs::metadata(&path)
        .map_err(|source| StoreError::File {
            path: path.clone(),
            shard_id,
            source,
        })?
        .len();
    if file_len < write_offset {
        return Err(StoreError::LogFileIncomplete {
            path,
            detail: format!("file is {} bytes, entries end at {}", file_len, write_offset),
        });
    }

    Ok(CurrentSegment {
        path,
        meta,
        range_first,
        range_last,
        write_offset,
        file_len,
    })
}

fn check_capacity(meta: &SegmentMeta, capacity: u32, path: &Path) -> Result<()> {
    if meta.capacity != capacity {
        return Err(bad_meta(
            path,
            format!("capacity {} does not match configured {}", meta.capacity, capacity),
        ));
    }
    Ok(())
}
