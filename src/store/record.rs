//! Key record and its packed form
//!
//! ```text
//! ┌────────────────┬─────────────┬─────┬───────┬───────────┐
//! │ TotalSize (4)  │ KeyLen (4)  │ Key │ Value │ CRC32 (4) │
//! └────────────────┴─────────────┴─────┴───────┴───────────┘
//! ```
//!
//! All integers little-endian. `TotalSize` counts every byte above, and the
//! CRC covers everything before it.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::error::{Result, StoreError};

/// Header: total size (4) + key length (4)
pub const RECORD_HEAD_SIZE: u32 = 8;

/// Tail: CRC32 (4)
pub const RECORD_TAIL_SIZE: u32 = 4;

/// Smallest possible packed record (empty key and value)
pub const MIN_RECORD_SIZE: u32 = RECORD_HEAD_SIZE + RECORD_TAIL_SIZE;

/// Pack size of a record holding `kv_len` key + value bytes
pub fn record_pack_size(kv_len: usize) -> u64 {
    MIN_RECORD_SIZE as u64 + kv_len as u64
}

/// An immutable key-value pair
///
/// Key and value live in one shared allocation, so cloning a record (as the
/// store split does) never copies the bytes. Equality and ordering look at
/// the key only.
#[derive(Clone)]
pub struct KeyRecord {
    buf: Arc<[u8]>,
    key_len: u32,
    pack_size: u32,
}

impl KeyRecord {
    /// Copy `key` and `value` into a new record
    pub fn new(key: &[u8], value: &[u8]) -> Result<Self> {
        let pack_size = record_pack_size(key.len() + value.len());
        if pack_size > u32::MAX as u64 {
            return Err(StoreError::SizeLimitExceeded {
                what: "kv record",
                limit: u32::MAX as u64,
                got: pack_size,
            });
        }

        let mut buf = Vec::with_capacity(key.len() + value.len());
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);

        Ok(Self {
            buf: buf.into(),
            key_len: key.len() as u32,
            pack_size: pack_size as u32,
        })
    }

    pub fn key(&self) -> &[u8] {
        &self.buf[..self.key_len as usize]
    }

    pub fn value(&self) -> &[u8] {
        &self.buf[self.key_len as usize..]
    }

    /// Encoded length including header and checksum
    pub fn pack_size(&self) -> u32 {
        self.pack_size
    }

    /// Encode into the front of `out`, returning the bytes written
    pub fn pack(&self, out: &mut [u8]) -> Result<u32> {
        let size = self.pack_size as usize;
        if out.len() < size {
            return Err(StoreError::OutOfBuffer {
                need: self.pack_size,
                got: out.len(),
            });
        }

        let check_len = size - RECORD_TAIL_SIZE as usize;
        {
            let mut dst = &mut out[..check_len];
            dst.put_u32_le(self.pack_size);
            dst.put_u32_le(self.key_len);
            dst.put_slice(&self.buf);
        }

        let checksum = crc32fast::hash(&out[..check_len]);
        (&mut out[check_len..size]).put_u32_le(checksum);

        Ok(self.pack_size)
    }

    /// Decode one record from the front of `buf`.
    ///
    /// Returns the record and the number of bytes it occupied. Checks run in
    /// order: minimum size, declared size against the buffer, key length
    /// against the declared size, then the checksum.
    pub fn parse(buf: &[u8]) -> Result<(Self, u32)> {
        let got = buf.len();
        if got < MIN_RECORD_SIZE as usize {
            return Err(StoreError::DataTooSmall {
                what: "kv",
                min: MIN_RECORD_SIZE,
                got: got as u32,
            });
        }

        let mut head = buf;
        let pack_size = head.get_u32_le();
        let key_len = head.get_u32_le();

        if pack_size as usize > got {
            return Err(StoreError::RecordSizeOut {
                buf_size: got.min(u32::MAX as usize) as u32,
                record_size: pack_size,
            });
        }
        if pack_size < MIN_RECORD_SIZE {
            return Err(StoreError::DataTooSmall {
                what: "kv pack size",
                min: MIN_RECORD_SIZE,
                got: pack_size,
            });
        }

        let kv_len = pack_size - MIN_RECORD_SIZE;
        if key_len > kv_len {
            return Err(StoreError::KeySizeOut { kv_len, key_len });
        }

        let check_len = (pack_size - RECORD_TAIL_SIZE) as usize;
        let read = (&buf[check_len..]).get_u32_le();
        let calc = crc32fast::hash(&buf[..check_len]);
        if read != calc {
            return Err(StoreError::ChecksumMismatch {
                what: "kv",
                read,
                calc,
            });
        }

        let body = &buf[RECORD_HEAD_SIZE as usize..check_len];
        Ok((
            Self {
                buf: Arc::from(body),
                key_len,
                pack_size,
            },
            pack_size,
        ))
    }
}

impl PartialEq for KeyRecord {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for KeyRecord {}

impl PartialOrd for KeyRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(other.key())
    }
}

// Lets ordered collections of records be searched by raw key bytes.
impl Borrow<[u8]> for KeyRecord {
    fn borrow(&self) -> &[u8] {
        self.key()
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("key", &String::from_utf8_lossy(self.key()))
            .field("value_len", &self.value().len())
            .field("pack_size", &self.pack_size)
            .finish()
    }
}
