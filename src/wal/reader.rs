//! Segment Reader
//!
//! Reads metadata tables and individual entries back from segment files.
//! Every entry is checked against its CRC and against the metadata row that
//! points at it.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::buffer::BufferPool;
use crate::error::{IoContext, Result, StoreError};

use super::entry::{entry_checksum, EntryHeader, EntryType, LogEntry, ENTRY_HEAD_SIZE};
use super::segment::{bad_meta, MetaEntry, SegmentMeta, META_ENTRY_SIZE, META_HEAD_SIZE};

/// Load and validate the metadata table of a segment file
pub fn read_meta(path: &Path, shard_id: u64, meta_pool: &BufferPool) -> Result<SegmentMeta> {
    let mut file = File::open(path).at(path, shard_id)?;

    let mut buf = meta_pool.acquire();
    if buf.len() < META_HEAD_SIZE {
        buf.resize(META_HEAD_SIZE, 0);
    }
    read_exact_or_incomplete(&mut file, &mut buf[..META_HEAD_SIZE], path, shard_id, "meta header")?;

    let (capacity, count) = SegmentMeta::declared_size(&buf[..META_HEAD_SIZE]);
    if count > capacity {
        return Err(bad_meta(
            path,
            format!("entry count {} exceeds capacity {}", count, capacity),
        ));
    }

    let len = META_HEAD_SIZE + count as usize * META_ENTRY_SIZE;
    if buf.len() < len {
        buf.resize(len, 0);
    }
    read_exact_or_incomplete(
        &mut file,
        &mut buf[META_HEAD_SIZE..len],
        path,
        shard_id,
        "meta table",
    )?;

    let meta = SegmentMeta::decode(&buf[..len], path)?;
    if meta.shard_id != shard_id {
        return Err(bad_meta(
            path,
            format!("belongs to shard {}, expected {}", meta.shard_id, shard_id),
        ));
    }
    Ok(meta)
}

/// Sequential-friendly reader over one segment file
///
/// Keeps track of its position so consecutive entries are read without
/// seeking.
#[derive(Debug)]
pub struct SegmentReader {
    file: BufReader<File>,
    path: PathBuf,
    shard_id: u64,
    pos: u64,
    len: u64,
}

impl SegmentReader {
    pub fn open(path: &Path, shard_id: u64) -> Result<Self> {
        let file = File::open(path).at(path, shard_id)?;
        let len = file.metadata().at(path, shard_id)?.len();
        Ok(Self {
            file: BufReader::new(file),
            path: path.to_path_buf(),
            shard_id,
            pos: 0,
            len,
        })
    }

    /// Read and verify the entry `row` points at
    pub fn read_entry(&mut self, row: &MetaEntry, head_pool: &BufferPool) -> Result<LogEntry> {
        if self.pos != row.offset {
            self.file
                .seek(SeekFrom::Start(row.offset))
                .at(&self.path, self.shard_id)?;
            self.pos = row.offset;
        }

        let mut head = head_pool.acquire();
        read_exact_or_incomplete(
            &mut self.file,
            &mut head[..ENTRY_HEAD_SIZE],
            &self.path,
            self.shard_id,
            "entry header",
        )?;
        let header = EntryHeader::decode(&head);
        self.pos += ENTRY_HEAD_SIZE as u64;

        if header.index != row.index || header.term != row.term {
            return Err(bad_meta(
                &self.path,
                format!(
                    "row ({}, {}) points at entry ({}, {})",
                    row.index, row.term, header.index, header.term
                ),
            ));
        }
        let entry_type = EntryType::from_u8(header.entry_type).ok_or_else(|| {
            bad_meta(
                &self.path,
                format!("entry {} has unknown type {}", header.index, header.entry_type),
            )
        })?;

        let end = row.offset + ENTRY_HEAD_SIZE as u64 + header.size as u64;
        if end > self.len {
            return Err(StoreError::LogFileIncomplete {
                path: self.path.clone(),
                detail: format!("entry {} ends at {}, file is {} bytes", row.index, end, self.len),
            });
        }
        let mut data = vec![0u8; header.size as usize];
        read_exact_or_incomplete(
            &mut self.file,
            &mut data,
            &self.path,
            self.shard_id,
            "entry data",
        )?;

        let calc = entry_checksum(&head[4..ENTRY_HEAD_SIZE], &data);
        if calc != header.checksum {
            return Err(StoreError::CrcNotMatch {
                path: self.path.clone(),
                what: "log entry",
                read: header.checksum,
                calc,
            });
        }

        self.pos += data.len() as u64;
        Ok(LogEntry {
            index: header.index,
            term: header.term,
            entry_type,
            data: Bytes::from(data),
        })
    }
}

fn read_exact_or_incomplete<R: Read>(
    src: &mut R,
    buf: &mut [u8],
    path: &Path,
    shard_id: u64,
    what: &str,
) -> Result<()> {
    match src.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(StoreError::LogFileIncomplete {
            path: path.to_path_buf(),
            detail: format!("{} truncated", what),
        }),
        Err(e) => Err::<(), _>(e).at(path, shard_id),
    }
}
