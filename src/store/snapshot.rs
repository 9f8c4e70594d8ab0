//! Whole-store snapshot codec
//!
//! ```text
//! ┌───────────┬─────────────┬─────────────────┬─────────────────┬──────────┬───────────┐
//! │ Magic (4) │ Version (4) │ RecordCount (4) │ PayloadSize (4) │ Record…  │ CRC32 (4) │
//! └───────────┴─────────────┴─────────────────┴─────────────────┴──────────┴───────────┘
//! ```
//!
//! `PayloadSize` is the sum of the records' pack sizes; the CRC covers every
//! preceding byte. Decoding dispatches on the version through [`DECODERS`],
//! so a new layout adds a row there without touching the existing decoders.

use std::io::Write;

use bytes::{Buf, BufMut};

use crate::buffer::BufferPool;
use crate::error::{Result, StoreError};

use super::record::{KeyRecord, MIN_RECORD_SIZE};

/// Magic number at the start of every snapshot
pub const SNAPSHOT_MAGIC: u32 = 0xBADB;

/// The only layout defined so far
pub const SNAPSHOT_VERSION_0: u32 = 0x0;

/// Version written by the encoder
pub const SNAPSHOT_VERSION: u32 = SNAPSHOT_VERSION_0;

/// Header: magic, version, record count, payload size
pub const STORE_HEAD_SIZE: u32 = 4 * 4;

/// Tail: CRC32
pub const STORE_TAIL_SIZE: u32 = 4;

/// Snapshot of an empty store
pub const MIN_STORE_SIZE: u32 = STORE_HEAD_SIZE + STORE_TAIL_SIZE;

/// Largest payload whose snapshot length still fits in 32 bits
pub const MAX_PAYLOAD_SIZE: u32 = u32::MAX - MIN_STORE_SIZE;

/// Total snapshot length for a given payload size
pub fn store_pack_size(payload_size: u32) -> u64 {
    MIN_STORE_SIZE as u64 + payload_size as u64
}

/// Result of a successful decode, records in ascending key order
#[derive(Debug)]
pub struct DecodedStore {
    pub records: Vec<KeyRecord>,
    pub payload_size: u32,
}

pub type DecodeFn = fn(&[u8]) -> Result<DecodedStore>;

/// Decoder per snapshot version
pub const DECODERS: &[(u32, DecodeFn)] = &[(SNAPSHOT_VERSION_0, decode_v0)];

/// Validate and decode a whole-store snapshot.
///
/// Nothing is returned unless every check passes.
pub fn decode_store(buf: &[u8]) -> Result<DecodedStore> {
    if buf.len() < MIN_STORE_SIZE as usize {
        return Err(StoreError::DataTooSmall {
            what: "store",
            min: MIN_STORE_SIZE,
            got: buf.len() as u32,
        });
    }

    let mut head = buf;
    let magic = head.get_u32_le();
    if magic != SNAPSHOT_MAGIC {
        return Err(StoreError::BadSnapshotMagic {
            want: SNAPSHOT_MAGIC,
            got: magic,
        });
    }

    let version = head.get_u32_le();
    let decode = DECODERS
        .iter()
        .find(|(v, _)| *v == version)
        .map(|(_, decode)| *decode)
        .ok_or(StoreError::UnknownSnapshotVersion(version))?;

    decode(buf)
}

fn decode_v0(buf: &[u8]) -> Result<DecodedStore> {
    let total = buf.len();

    let crc_at = total - STORE_TAIL_SIZE as usize;
    let read = (&buf[crc_at..]).get_u32_le();
    let calc = crc32fast::hash(&buf[..crc_at]);
    if read != calc {
        return Err(StoreError::ChecksumMismatch {
            what: "store",
            read,
            calc,
        });
    }

    let mut head = &buf[8..STORE_HEAD_SIZE as usize];
    let record_count = head.get_u32_le();
    let payload_size = head.get_u32_le();

    let want = store_pack_size(payload_size);
    if want != total as u64 {
        return Err(StoreError::SnapshotSizeMismatch {
            want: want.min(u32::MAX as u64) as u32,
            got: total.min(u32::MAX as usize) as u32,
        });
    }
    if record_count as u64 * MIN_RECORD_SIZE as u64 > payload_size as u64 {
        return Err(StoreError::SnapshotRecordCountTooLarge {
            most: payload_size / MIN_RECORD_SIZE,
            got: record_count,
        });
    }

    let payload = &buf[STORE_HEAD_SIZE as usize..crc_at];
    let mut records: Vec<KeyRecord> = Vec::with_capacity(record_count as usize);
    let mut pos = 0usize;
    while pos < payload.len() {
        let (record, n) = KeyRecord::parse(&payload[pos..])?;
        if let Some(prev) = records.last() {
            if prev.key() >= record.key() {
                return Err(StoreError::SnapshotKeyDisorder {
                    position: records.len() as u32,
                });
            }
        }
        pos += n as usize;
        records.push(record);
    }

    if pos as u64 != payload_size as u64 {
        return Err(StoreError::SnapshotPayloadMismatch {
            want: payload_size,
            got: pos as u32,
        });
    }
    if records.len() as u64 != record_count as u64 {
        return Err(StoreError::SnapshotRecordCountMismatch {
            want: record_count,
            got: records.len() as u32,
        });
    }

    Ok(DecodedStore {
        records,
        payload_size,
    })
}

/// Streaming snapshot writer
///
/// Writes the header up front, packs each record through a pooled scratch
/// buffer, and appends the CRC in [`SnapshotEncoder::finish`]. The declared
/// count and payload size are checked against what was actually written.
pub struct SnapshotEncoder<'p, W: Write> {
    out: W,
    pool: &'p BufferPool,
    hasher: crc32fast::Hasher,
    record_count: u32,
    payload_size: u32,
    records_written: u64,
    payload_written: u64,
}

impl<'p, W: Write> SnapshotEncoder<'p, W> {
    /// Write the header for a snapshot of `record_count` records
    pub fn begin(
        out: W,
        record_count: u32,
        payload_size: u32,
        pool: &'p BufferPool,
    ) -> Result<Self> {
        let mut encoder = Self {
            out,
            pool,
            hasher: crc32fast::Hasher::new(),
            record_count,
            payload_size,
            records_written: 0,
            payload_written: 0,
        };

        let mut header = [0u8; STORE_HEAD_SIZE as usize];
        {
            let mut dst = &mut header[..];
            dst.put_u32_le(SNAPSHOT_MAGIC);
            dst.put_u32_le(SNAPSHOT_VERSION);
            dst.put_u32_le(record_count);
            dst.put_u32_le(payload_size);
        }
        encoder.write(&header)?;

        Ok(encoder)
    }

    /// Append one record (callers feed records in ascending key order)
    pub fn push(&mut self, record: &KeyRecord) -> Result<()> {
        let mut scratch = self.pool.acquire();
        let size = record.pack_size() as usize;
        if scratch.len() < size {
            scratch.resize(size, 0);
        }
        let n = record.pack(&mut scratch)? as usize;

        self.out.write_all(&scratch[..n])?;
        self.hasher.update(&scratch[..n]);
        self.records_written += 1;
        self.payload_written += n as u64;
        Ok(())
    }

    /// Check the totals, write the CRC, and return the snapshot length
    pub fn finish(mut self) -> Result<u64> {
        if self.payload_written != self.payload_size as u64 {
            return Err(StoreError::StoreSizeMismatch {
                calc: self.payload_size,
                got: self.payload_written.min(u32::MAX as u64) as u32,
            });
        }
        if self.records_written != self.record_count as u64 {
            return Err(StoreError::SnapshotRecordCountMismatch {
                want: self.record_count,
                got: self.records_written.min(u32::MAX as u64) as u32,
            });
        }

        let checksum = self.hasher.finalize();
        self.out.write_all(&checksum.to_le_bytes())?;
        self.out.flush()?;

        Ok(store_pack_size(self.payload_size))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.hasher.update(bytes);
        Ok(())
    }
}

/// Encode an in-order sequence of records into a new buffer
pub fn encode_store<'a, I>(records: I, payload_size: u32, pool: &BufferPool) -> Result<Vec<u8>>
where
    I: ExactSizeIterator<Item = &'a KeyRecord>,
{
    let mut out = Vec::with_capacity(store_pack_size(payload_size) as usize);
    let mut encoder = SnapshotEncoder::begin(&mut out, records.len() as u32, payload_size, pool)?;
    for record in records {
        encoder.push(record)?;
    }
    encoder.finish()?;
    Ok(out)
}
