//! Segment Writer
//!
//! Appends entries to the active segment. Entry bytes go through a
//! `BufWriter` and are handed to the OS on `flush`; the metadata table at the
//! head of the file is only rewritten on `sync`, after the data it points at
//! is on disk.
//!
//! A batch that fails halfway is undone with `rollback` to the `WriteMark`
//! taken before it. When even that fails, or a sync fails, the writer is
//! marked broken and the owning store refuses further appends.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::mem;
use std::path::{Path, PathBuf};

use crate::buffer::BufferPool;
use crate::error::{IoContext, Result};

use super::entry::{encode_header, LogEntry, ENTRY_HEAD_SIZE};
use super::segment::{meta_region_size, MetaEntry, SegmentMeta};

/// Writer for the segment currently accepting appends
#[derive(Debug)]
pub(crate) struct SegmentWriter {
    file: BufWriter<File>,
    path: PathBuf,
    shard_id: u64,

    /// Index range this segment is aligned to
    range_first: u64,
    range_last: u64,

    /// Rows for every entry written so far, synced or not
    meta: SegmentMeta,

    /// Offset the next entry header lands at
    write_offset: u64,

    /// Rows covered by the table on disk
    synced_rows: usize,

    /// Set once the file no longer matches `meta` and `write_offset`
    broken: bool,
}

/// Writer position taken before a batch
#[derive(Debug, Clone, Copy)]
pub(crate) struct WriteMark {
    rows: usize,
    write_offset: u64,
}

impl SegmentWriter {
    /// Create a fresh segment file with an empty metadata table
    pub(crate) fn create(
        path: &Path,
        shard_id: u64,
        capacity: u32,
        range: (u64, u64),
        meta_pool: &BufferPool,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .at(path, shard_id)?;

        let data_start = meta_region_size(capacity);
        file.set_len(data_start).at(path, shard_id)?;

        let mut writer = Self {
            file: BufWriter::new(file),
            path: path.to_path_buf(),
            shard_id,
            range_first: range.0,
            range_last: range.1,
            meta: SegmentMeta::new(shard_id, capacity),
            write_offset: data_start,
            synced_rows: 0,
            broken: false,
        };
        writer.write_meta(meta_pool)?;
        writer.file.get_ref().sync_all().at(path, shard_id)?;
        Ok(writer)
    }

    /// Reopen a recovered segment; anything past `write_offset` is cut off
    pub(crate) fn resume(
        path: &Path,
        shard_id: u64,
        range: (u64, u64),
        meta: SegmentMeta,
        write_offset: u64,
    ) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .at(path, shard_id)?;

        let file_len = file.metadata().at(path, shard_id)?.len();
        if file_len != write_offset {
            file.set_len(write_offset).at(path, shard_id)?;
            file.sync_all().at(path, shard_id)?;
        }
        file.seek(SeekFrom::Start(write_offset)).at(path, shard_id)?;

        let synced_rows = meta.entries.len();
        Ok(Self {
            file: BufWriter::new(file),
            path: path.to_path_buf(),
            shard_id,
            range_first: range.0,
            range_last: range.1,
            meta,
            write_offset,
            synced_rows,
            broken: false,
        })
    }

    /// Write one entry at the end of the data region
    pub(crate) fn append(&mut self, entry: &LogEntry, head_pool: &BufferPool) -> Result<MetaEntry> {
        let mut head = head_pool.acquire();
        encode_header(entry, &mut head)?;

        self.file
            .write_all(&head[..ENTRY_HEAD_SIZE])
            .at(&self.path, self.shard_id)?;
        self.file.write_all(&entry.data).at(&self.path, self.shard_id)?;

        let row = MetaEntry {
            index: entry.index,
            term: entry.term,
            offset: self.write_offset,
        };
        self.meta.entries.push(row);
        self.write_offset += entry.encoded_size();
        Ok(row)
    }

    /// Hand buffered bytes to the OS
    pub(crate) fn flush(&mut self) -> Result<()> {
        self.file.flush().at(&self.path, self.shard_id)
    }

    /// Make every written entry durable: data first, then the metadata table.
    ///
    /// A failure leaves the table on disk in an unknown state, so it breaks
    /// the writer.
    pub(crate) fn sync(&mut self, meta_pool: &BufferPool) -> Result<()> {
        let result = self.sync_inner(meta_pool);
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    fn sync_inner(&mut self, meta_pool: &BufferPool) -> Result<()> {
        self.flush()?;
        if self.synced_rows == self.meta.entries.len() {
            return Ok(());
        }
        self.file.get_ref().sync_data().at(&self.path, self.shard_id)?;
        self.write_meta(meta_pool)?;
        self.file.get_ref().sync_data().at(&self.path, self.shard_id)?;
        self.synced_rows = self.meta.entries.len();
        Ok(())
    }

    pub(crate) fn mark(&self) -> WriteMark {
        WriteMark {
            rows: self.meta.entries.len(),
            write_offset: self.write_offset,
        }
    }

    /// Undo every append made since `mark`.
    ///
    /// Buffered bytes are dropped unwritten and the file is cut back to the
    /// marked offset through a fresh handle. Nothing is changed if the file
    /// cannot be reopened.
    pub(crate) fn rollback(&mut self, mark: WriteMark) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .at(&self.path, self.shard_id)?;
        file.set_len(mark.write_offset).at(&self.path, self.shard_id)?;
        file.seek(SeekFrom::Start(mark.write_offset))
            .at(&self.path, self.shard_id)?;

        let stale = mem::replace(&mut self.file, BufWriter::new(file));
        let (_, _unwritten) = stale.into_parts();

        self.meta.entries.truncate(mark.rows);
        self.synced_rows = self.synced_rows.min(mark.rows);
        self.write_offset = mark.write_offset;
        Ok(())
    }

    /// Release the file without writing out anything still buffered
    pub(crate) fn abandon(self) {
        let (_, _unwritten) = self.file.into_parts();
    }

    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }

    fn write_meta(&mut self, meta_pool: &BufferPool) -> Result<()> {
        let mut buf = meta_pool.acquire();
        if buf.len() < self.meta.encoded_len() {
            buf.resize(self.meta.encoded_len(), 0);
        }
        let len = self.meta.encode(&mut buf)?;

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(0)).at(&self.path, self.shard_id)?;
        file.write_all(&buf[..len]).at(&self.path, self.shard_id)?;
        file.seek(SeekFrom::Start(self.write_offset))
            .at(&self.path, self.shard_id)?;
        Ok(())
    }

    /// Whether the last slot of the range has been written
    pub(crate) fn is_full(&self) -> bool {
        self.meta.last_index() == Some(self.range_last)
    }

    /// Entries written since the last sync
    pub(crate) fn unsynced(&self) -> usize {
        self.meta.entries.len() - self.synced_rows
    }

    pub(crate) fn range(&self) -> (u64, u64) {
        (self.range_first, self.range_last)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    /// Swap in a read-only handle at the write offset so the next flush fails
    #[cfg(test)]
    pub(crate) fn reopen_read_only(&mut self) -> std::io::Result<()> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.write_offset))?;
        let stale = mem::replace(&mut self.file, BufWriter::new(file));
        let (_, _unwritten) = stale.into_parts();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn write_offset(&self) -> u64 {
        self.write_offset
    }
}
