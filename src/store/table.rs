//! KvStore implementation
//!
//! BTreeSet of records behind an RwLock, plus a lock-free running total of
//! the records' pack sizes so the snapshot size is known without a scan.

use std::collections::BTreeSet;
use std::io::Write;
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::buffer::BufferPool;
use crate::error::{Result, StoreError};

use super::record::KeyRecord;
use super::snapshot::{self, DecodedStore, SnapshotEncoder, MAX_PAYLOAD_SIZE};

/// Scratch block used when packing records into a snapshot
const SNAPSHOT_SCRATCH_SIZE: usize = 4096;

/// Ordered in-memory key-value store
///
/// ## Concurrency
/// - `set`/`del`/`recover` take the write lock
/// - `get`/`range`/`snapshot`/`split` take the read lock for their whole
///   traversal, so they never see a half-applied mutation
/// - `pack_size()` reads the atomic counter without locking
pub struct KvStore {
    /// Records ordered by key
    tree: RwLock<BTreeSet<KeyRecord>>,

    /// Sum of pack sizes of all records
    pack_size: AtomicU32,

    /// Scratch buffers for snapshot encoding
    scratch: BufferPool,
}

impl KvStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::from_tree(BTreeSet::new(), 0)
    }

    fn from_tree(tree: BTreeSet<KeyRecord>, pack_size: u32) -> Self {
        Self {
            tree: RwLock::new(tree),
            pack_size: AtomicU32::new(pack_size),
            scratch: BufferPool::new(SNAPSHOT_SCRATCH_SIZE),
        }
    }

    /// Insert or overwrite a key.
    ///
    /// Fails without mutating anything if the store would no longer fit the
    /// snapshot format's 32-bit payload size.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let next = KeyRecord::new(key, value)?;

        let mut tree = self.tree.write();
        let prev = tree.get(key).map_or(0, KeyRecord::pack_size);
        let total =
            self.pack_size.load(Ordering::Acquire) as u64 - prev as u64 + next.pack_size() as u64;
        if total > MAX_PAYLOAD_SIZE as u64 {
            return Err(StoreError::SizeLimitExceeded {
                what: "store payload",
                limit: MAX_PAYLOAD_SIZE as u64,
                got: total,
            });
        }

        tree.replace(next);
        self.pack_size.store(total as u32, Ordering::Release);
        Ok(())
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.tree.read().get(key).map(|r| r.value().to_vec())
    }

    /// Delete a key, returning whether it existed
    pub fn del(&self, key: &[u8]) -> bool {
        let mut tree = self.tree.write();
        match tree.take(key) {
            Some(prev) => {
                self.pack_size.fetch_sub(prev.pack_size(), Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// All pairs with `a <= key < b`, in key order
    pub fn range(&self, a: &[u8], b: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        if a >= b {
            return Vec::new();
        }
        self.tree
            .read()
            .range::<[u8], _>((Bound::Included(a), Bound::Excluded(b)))
            .map(|r| (r.key().to_vec(), r.value().to_vec()))
            .collect()
    }

    /// Partition into `(key < split_key, key >= split_key)`.
    ///
    /// Both halves are built by concurrent walks of this store under one
    /// shared read guard, so no `set`/`del` can interleave with the split.
    /// Records are shared with the source, not copied.
    pub fn split(&self, split_key: &[u8]) -> Result<(KvStore, KvStore)> {
        let tree = self.tree.read();
        let source: &BTreeSet<KeyRecord> = &tree;

        let (low, high) = crossbeam::thread::scope(|s| {
            let low = s.spawn(|_| {
                let below = (Bound::Unbounded, Bound::Excluded(split_key));
                collect_half(source.range::<[u8], _>(below))
            });
            let high = s.spawn(|_| {
                let from = (Bound::Included(split_key), Bound::Unbounded);
                collect_half(source.range::<[u8], _>(from))
            });
            (low.join(), high.join())
        })
        .map_err(|_| StoreError::WorkerPanicked("store split"))?;

        let ((low_tree, low_size), (high_tree, high_size)) = match (low, high) {
            (Ok(low), Ok(high)) => (low, high),
            _ => return Err(StoreError::WorkerPanicked("store split")),
        };

        debug!(
            low_records = low_tree.len(),
            high_records = high_tree.len(),
            "split store"
        );

        Ok((
            KvStore::from_tree(low_tree, low_size),
            KvStore::from_tree(high_tree, high_size),
        ))
    }

    /// Export the whole store in the snapshot format
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.snapshot_size() as usize);
        self.write_snapshot(&mut out)?;
        Ok(out)
    }

    /// Stream the snapshot to `out`, returning the bytes written
    pub fn write_snapshot<W: Write>(&self, out: W) -> Result<u64> {
        let tree = self.tree.read();
        let payload_size = self.pack_size.load(Ordering::Acquire);

        let mut encoder =
            SnapshotEncoder::begin(out, tree.len() as u32, payload_size, &self.scratch)?;
        for record in tree.iter() {
            encoder.push(record)?;
        }
        encoder.finish()
    }

    /// Replace the whole store with the contents of a snapshot.
    ///
    /// The buffer is fully decoded and validated first; on any error the
    /// current contents are left untouched.
    pub fn recover(&self, snapshot: &[u8]) -> Result<()> {
        let decoded = snapshot::decode_store(snapshot)?;
        self.install(decoded);
        Ok(())
    }

    /// Replace the whole store with already decoded snapshot contents
    pub fn install(&self, decoded: DecodedStore) {
        let records = decoded.records.len();
        let tree: BTreeSet<KeyRecord> = decoded.records.into_iter().collect();

        let mut current = self.tree.write();
        *current = tree;
        self.pack_size.store(decoded.payload_size, Ordering::Release);
        drop(current);

        debug!(records, payload_size = decoded.payload_size, "recovered store from snapshot");
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    /// Sum of the records' pack sizes (lock-free)
    pub fn pack_size(&self) -> u32 {
        self.pack_size.load(Ordering::Acquire)
    }

    /// Length `snapshot()` would currently produce
    pub fn snapshot_size(&self) -> u64 {
        snapshot::store_pack_size(self.pack_size())
    }
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_half<'a>(records: impl Iterator<Item = &'a KeyRecord>) -> (BTreeSet<KeyRecord>, u32) {
    let mut size = 0u32;
    let tree: BTreeSet<KeyRecord> = records
        .inspect(|r| size += r.pack_size())
        .cloned()
        .collect();
    (tree, size)
}
