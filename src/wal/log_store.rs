//! LogSegmentStore implementation
//!
//! Owns one shard's log directory: the active segment writer, the catalog of
//! rotated segments, the hot entry cache and the hard-state ring.
//!
//! ## Locking
//! ```text
//!   writer (Mutex)  ──►  index (RwLock)  ──►  meta_cache (Mutex) / cache (RwLock)
//! ```
//! Locks are only ever taken left to right. Appends serialize on `writer`;
//! readers take `index` shared for the duration of a disk read, so rotation
//! and compaction (which take it exclusively) never move a file under them.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::buffer::BufferPool;
use crate::config::{Config, WalSyncStrategy};
use crate::error::{IoContext, Result, StoreError};

use super::cache::EntryCache;
use super::entry::{EntryBatch, LogEntry, ENTRY_HEAD_SIZE, NO_LIMIT};
use super::hard_state::{HardState, HardStateRing, SnapshotMeta};
use super::reader::{read_meta, SegmentReader};
use super::recovery::{scan_log, SegmentInfo};
use super::segment::{
    bad_meta, current_file_name, meta_region_size, segment_file_name, segment_range, MetaEntry,
    SegmentMeta,
};
use super::writer::{SegmentWriter, WriteMark};

/// Buffers recycled across appends and reads
#[derive(Debug)]
struct WalPools {
    entry_head: BufferPool,
    meta: BufferPool,
}

/// The segment accepting appends, as readers see it
#[derive(Debug)]
struct ActiveSegment {
    path: PathBuf,
    rows: Vec<MetaEntry>,
}

impl ActiveSegment {
    fn row(&self, index: u64) -> Option<&MetaEntry> {
        let first = self.rows.first()?.index;
        self.rows.get(index.checked_sub(first)? as usize)
    }
}

/// Everything a reader needs to find an entry on disk
#[derive(Debug)]
struct LogIndex {
    /// Rotated segments keyed by `range_first`
    sealed: BTreeMap<u64, SegmentInfo>,
    active: ActiveSegment,
    first_index: u64,
    last_index: u64,

    /// Latest snapshot compacted into since open; its term stays answerable
    /// after the segment holding `compacted.index` is gone
    compacted: SnapshotMeta,
}

impl LogIndex {
    fn sealed_for(&self, index: u64) -> Option<&SegmentInfo> {
        self.sealed
            .range(..=index)
            .next_back()
            .map(|(_, info)| info)
            .filter(|info| index >= info.first_stored && index <= info.range_last)
    }

    fn recompute_first_index(&mut self) {
        self.first_index = match self.sealed.values().next() {
            Some(info) => info.first_stored,
            None => self
                .active
                .rows
                .first()
                .map_or(self.last_index + 1, |row| row.index),
        };
    }
}

/// Segmented on-disk log plus hard state for one shard
///
/// ## Lifecycle
/// `open` recovers (or creates) the directory, `store_entries` appends and
/// rotates, `close` syncs and releases the files. Dropping without `close`
/// loses whatever was written after the last sync.
pub struct LogSegmentStore {
    dir: PathBuf,
    shard_id: u64,
    capacity: u32,
    sync_strategy: WalSyncStrategy,
    pools: WalPools,

    /// Single writer per shard
    writer: Mutex<SegmentWriter>,

    index: RwLock<LogIndex>,

    /// Recently used metadata tables of rotated segments
    meta_cache: Mutex<VecDeque<(u64, Arc<SegmentMeta>)>>,
    meta_cache_capacity: usize,

    cache: RwLock<EntryCache>,

    hard_state: Mutex<HardStateRing>,
}

impl LogSegmentStore {
    /// Open the log of `config.shard_id` under `config.data_dir`.
    ///
    /// Runs the full recovery scan first; any inconsistency found there fails
    /// the open and leaves the directory as it was.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let dir = config.data_dir.clone();
        let shard_id = config.shard_id;
        let capacity = config.segment_capacity;

        fs::create_dir_all(&dir).map_err(|source| StoreError::LogDirAccess {
            path: dir.clone(),
            source,
        })?;

        let pools = WalPools {
            entry_head: BufferPool::new(ENTRY_HEAD_SIZE),
            meta: BufferPool::with_max_idle(meta_region_size(capacity) as usize, 2),
        };

        let mut scan = scan_log(&dir, shard_id, capacity)?;
        let hard_state = HardStateRing::load(&dir, shard_id, config.hard_state_ring_size)?;
        let next_range = scan.next_range(capacity);
        let scanned_last = scan.last_index();

        let writer = match scan.current.take() {
            Some(current) => {
                if current.unsynced_tail() > 0 {
                    warn!(
                        shard_id,
                        path = %current.path.display(),
                        bytes = current.unsynced_tail(),
                        "dropping unsynced tail of current segment"
                    );
                }
                SegmentWriter::resume(
                    &current.path,
                    shard_id,
                    (current.range_first, current.range_last),
                    current.meta,
                    current.write_offset,
                )?
            }
            None => SegmentWriter::create(
                &dir.join(current_file_name(shard_id)),
                shard_id,
                capacity,
                next_range,
                &pools.meta,
            )?,
        };

        let (range_first, _) = writer.range();
        let last_index = scanned_last.unwrap_or(range_first - 1);
        let mut index = LogIndex {
            sealed: scan
                .sealed
                .into_iter()
                .map(|info| (info.range_first, info))
                .collect(),
            active: ActiveSegment {
                path: writer.path().to_path_buf(),
                rows: writer.meta().entries.clone(),
            },
            first_index: 0,
            last_index,
            compacted: SnapshotMeta::default(),
        };
        index.recompute_first_index();

        let store = Self {
            dir,
            shard_id,
            capacity,
            sync_strategy: config.wal_sync_strategy,
            pools,
            writer: Mutex::new(writer),
            index: RwLock::new(index),
            meta_cache: Mutex::new(VecDeque::new()),
            meta_cache_capacity: config.segment_cache_capacity,
            cache: RwLock::new(EntryCache::new(config.entry_cache_capacity)),
            hard_state: Mutex::new(hard_state),
        };

        {
            let mut writer = store.writer.lock();
            if writer.is_full() {
                store.rotate(&mut writer)?;
            }
        }
        store.warm_cache(config.entry_cache_capacity)?;

        info!(
            shard_id,
            dir = %store.dir.display(),
            first_index = store.first_index(),
            last_index = store.last_index(),
            segments = store.segment_count(),
            "opened log"
        );
        Ok(store)
    }

    // =========================================================================
    // Append
    // =========================================================================

    /// Append a contiguous batch starting at `last_index() + 1`.
    ///
    /// The whole batch is validated before anything is written. A batch that
    /// crosses the active segment's range is split and the segment rotated.
    ///
    /// A write failure undoes the failed chunk, so `last_index` stays at the
    /// end of the last chunk that made it and the same entries can be retried.
    /// Chunks already rotated into a sealed segment stay appended. A failed
    /// rollback, rotation or sync leaves the file out of step with the
    /// writer; every later append then fails with `LogWriterBroken` until
    /// the log is reopened or restarted behind a snapshot.
    pub fn store_entries(&self, entries: &[LogEntry]) -> Result<()> {
        let Some(head) = entries.first() else {
            return Ok(());
        };
        for pair in entries.windows(2) {
            if pair[1].index != pair[0].index + 1 {
                return Err(StoreError::LastIndexNotMatch {
                    shard_id: self.shard_id,
                    expected: pair[0].index + 1,
                    got: pair[1].index,
                });
            }
        }
        if let Some(entry) = entries.iter().find(|e| e.data.len() > u32::MAX as usize) {
            return Err(StoreError::SizeLimitExceeded {
                what: "log entry data",
                limit: u32::MAX as u64,
                got: entry.data.len() as u64,
            });
        }

        let mut writer = self.writer.lock();
        self.check_writer(&writer)?;
        let expected = self.index.read().last_index + 1;
        if head.index != expected {
            return Err(StoreError::LastIndexNotMatch {
                shard_id: self.shard_id,
                expected,
                got: head.index,
            });
        }

        let mut rest = entries;
        while !rest.is_empty() {
            if writer.is_full() {
                self.rotate(&mut writer)?;
            }
            let (_, range_last) = writer.range();
            let room = (range_last - rest[0].index + 1).min(rest.len() as u64) as usize;
            let (chunk, tail) = rest.split_at(room);

            let mark = writer.mark();
            let rows = match self.write_chunk(&mut writer, chunk) {
                Ok(rows) => rows,
                Err(err) => {
                    self.undo_chunk(&mut writer, mark);
                    return Err(err);
                }
            };

            {
                let mut index = self.index.write();
                index.active.rows.extend(rows);
                index.last_index = chunk[chunk.len() - 1].index;
                index.recompute_first_index();
            }
            self.cache.write().append(chunk);
            rest = tail;
        }

        match self.sync_strategy {
            WalSyncStrategy::EveryWrite => writer.sync(&self.pools.meta)?,
            WalSyncStrategy::EveryNEntries { count } if writer.unsynced() >= count => {
                writer.sync(&self.pools.meta)?
            }
            _ => {}
        }
        Ok(())
    }

    fn write_chunk(
        &self,
        writer: &mut SegmentWriter,
        chunk: &[LogEntry],
    ) -> Result<Vec<MetaEntry>> {
        let mut rows = Vec::with_capacity(chunk.len());
        for entry in chunk {
            rows.push(writer.append(entry, &self.pools.entry_head)?);
        }
        writer.flush()?;
        Ok(rows)
    }

    fn undo_chunk(&self, writer: &mut SegmentWriter, mark: WriteMark) {
        if let Err(err) = writer.rollback(mark) {
            writer.mark_broken();
            error!(
                shard_id = self.shard_id,
                path = %writer.path().display(),
                error = %err,
                "failed to roll back partial append, log writer disabled"
            );
        }
    }

    fn check_writer(&self, writer: &SegmentWriter) -> Result<()> {
        if writer.is_broken() {
            return Err(StoreError::LogWriterBroken {
                shard_id: self.shard_id,
            });
        }
        Ok(())
    }

    /// Seal the full active segment and open the next one
    fn rotate(&self, writer: &mut SegmentWriter) -> Result<()> {
        writer.sync(&self.pools.meta)?;
        let result = self.seal_and_replace(writer);
        if result.is_err() {
            writer.mark_broken();
        }
        result
    }

    fn seal_and_replace(&self, writer: &mut SegmentWriter) -> Result<()> {
        let (first, last) = writer.range();
        let sealed_path = self.dir.join(segment_file_name(self.shard_id, first, last));
        let current_path = self.dir.join(current_file_name(self.shard_id));
        let next_range = (last + 1, last + self.capacity as u64);

        let mut index = self.index.write();
        fs::rename(writer.path(), &sealed_path).at(&sealed_path, self.shard_id)?;
        let next = SegmentWriter::create(
            &current_path,
            self.shard_id,
            self.capacity,
            next_range,
            &self.pools.meta,
        )?;
        sync_dir(&self.dir, self.shard_id)?;

        let sealed = mem::replace(writer, next);
        let meta = Arc::new(sealed.meta().clone());
        let first_stored = meta.first_index().unwrap_or(first);
        index.sealed.insert(
            first,
            SegmentInfo {
                range_first: first,
                range_last: last,
                first_stored,
                path: sealed_path.clone(),
            },
        );
        index.active = ActiveSegment {
            path: current_path,
            rows: Vec::new(),
        };
        drop(index);

        self.remember_meta(first, meta);
        info!(
            shard_id = self.shard_id,
            path = %sealed_path.display(),
            first_index = first_stored,
            last_index = last,
            "rotated log segment"
        );
        Ok(())
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Entries with index in `[lo, hi)`, capped at `max_bytes` of encoded size.
    ///
    /// At least one entry is returned whenever one matches. The flag is true
    /// when `lo` has already been compacted away; the caller must then fall
    /// back to a snapshot.
    pub fn entries(&self, lo: u64, hi: u64, max_bytes: u64) -> Result<(Vec<LogEntry>, bool)> {
        let (first, last) = self.bounds();
        if lo < first {
            return Ok((Vec::new(), true));
        }
        if lo > hi || hi > last + 1 {
            return Err(StoreError::IndexOutOfRange {
                shard_id: self.shard_id,
                lo,
                hi,
                first,
                last,
            });
        }

        let mut batch = EntryBatch::new(max_bytes);
        let mut next = lo;
        while next < hi && !batch.is_full() {
            let cache_first = {
                let cache = self.cache.read();
                let cache_first = cache.first_index();
                if cache_first.map_or(false, |cf| next >= cf) {
                    let read_to = cache.read_into(next, hi, &mut batch);
                    if read_to > next {
                        next = read_to;
                        continue;
                    }
                }
                cache_first
            };

            let stop = match cache_first {
                Some(cf) if cf > next => cf.min(hi),
                _ => hi,
            };
            match self.read_from_disk(next, stop, &mut batch) {
                Ok(read_to) => next = read_to,
                Err(StoreError::IndexCompacted { .. }) if next == lo => {
                    return Ok((Vec::new(), true));
                }
                Err(e) => return Err(e),
            }
        }

        Ok((batch.into_entries(), false))
    }

    /// Read `[lo, hi)` from segment files into `batch`, returning the next
    /// index still to be read
    fn read_from_disk(&self, lo: u64, hi: u64, batch: &mut EntryBatch) -> Result<u64> {
        let index = self.index.read();
        if lo < index.first_index {
            return Err(StoreError::IndexCompacted {
                shard_id: self.shard_id,
                index: lo,
                first: index.first_index,
            });
        }
        let hi = hi.min(index.last_index + 1);

        let mut next = lo;
        while next < hi && !batch.is_full() {
            let sealed_meta: Arc<SegmentMeta>;
            let (path, rows, seg_last): (&Path, &[MetaEntry], u64) =
                match index.sealed_for(next) {
                    Some(info) => {
                        sealed_meta = self.load_meta(info)?;
                        (
                            info.path.as_path(),
                            sealed_meta.entries.as_slice(),
                            info.range_last,
                        )
                    }
                    None => (
                        index.active.path.as_path(),
                        index.active.rows.as_slice(),
                        index.last_index,
                    ),
                };

            let first_row = rows.first().map_or(next, |row| row.index);
            let mut reader = SegmentReader::open(path, self.shard_id)?;
            while next < hi && next <= seg_last {
                let row = next
                    .checked_sub(first_row)
                    .and_then(|pos| rows.get(pos as usize))
                    .ok_or_else(|| bad_meta(path, format!("no metadata row for entry {}", next)))?;
                let entry = reader.read_entry(row, &self.pools.entry_head)?;
                if !batch.push(entry) {
                    break;
                }
                next += 1;
            }
        }
        Ok(next)
    }

    /// Metadata table of a rotated segment, through the small LRU
    fn load_meta(&self, info: &SegmentInfo) -> Result<Arc<SegmentMeta>> {
        {
            let mut cached = self.meta_cache.lock();
            if let Some(pos) = cached.iter().position(|(first, _)| *first == info.range_first) {
                if let Some(hit) = cached.remove(pos) {
                    let meta = Arc::clone(&hit.1);
                    cached.push_back(hit);
                    return Ok(meta);
                }
            }
        }

        let meta = Arc::new(read_meta(&info.path, self.shard_id, &self.pools.meta)?);
        debug!(shard_id = self.shard_id, path = %info.path.display(), "loaded segment meta");
        self.remember_meta(info.range_first, Arc::clone(&meta));
        Ok(meta)
    }

    fn remember_meta(&self, range_first: u64, meta: Arc<SegmentMeta>) {
        if self.meta_cache_capacity == 0 {
            return;
        }
        let mut cached = self.meta_cache.lock();
        cached.retain(|(first, _)| *first != range_first);
        cached.push_back((range_first, meta));
        while cached.len() > self.meta_cache_capacity {
            cached.pop_front();
        }
    }

    fn warm_cache(&self, capacity: usize) -> Result<()> {
        let (first, last) = self.bounds();
        if capacity == 0 || last < first {
            return Ok(());
        }
        let lo = first.max((last + 1).saturating_sub(capacity as u64));
        let mut batch = EntryBatch::new(NO_LIMIT);
        self.read_from_disk(lo, last + 1, &mut batch)?;
        self.cache.write().append(&batch.into_entries());
        Ok(())
    }

    /// Term of the entry at `index`.
    ///
    /// The index of the latest snapshot passed to `compact` since open keeps
    /// answering with the snapshot's term even once its segment is removed.
    pub fn term(&self, index: u64) -> Result<u64> {
        if let Some(entry) = self.cache.read().get(index) {
            return Ok(entry.term);
        }

        let log = self.index.read();
        if index < log.first_index {
            if index != 0 && index == log.compacted.index {
                return Ok(log.compacted.term);
            }
            return Err(StoreError::IndexCompacted {
                shard_id: self.shard_id,
                index,
                first: log.first_index,
            });
        }
        if index > log.last_index {
            return Err(StoreError::IndexOutOfRange {
                shard_id: self.shard_id,
                lo: index,
                hi: index + 1,
                first: log.first_index,
                last: log.last_index,
            });
        }

        let row = match log.sealed_for(index) {
            Some(info) => self.load_meta(info)?.get(index).copied(),
            None => log.active.row(index).copied(),
        };
        row.map(|row| row.term).ok_or_else(|| {
            bad_meta(
                &log.active.path,
                format!("no metadata row for entry {}", index),
            )
        })
    }

    pub fn first_index(&self) -> u64 {
        self.index.read().first_index
    }

    pub fn last_index(&self) -> u64 {
        self.index.read().last_index
    }

    fn bounds(&self) -> (u64, u64) {
        let index = self.index.read();
        (index.first_index, index.last_index)
    }

    /// Rotated segments plus the active one
    pub fn segment_count(&self) -> usize {
        self.index.read().sealed.len() + 1
    }

    pub fn shard_id(&self) -> u64 {
        self.shard_id
    }

    // =========================================================================
    // Hard State
    // =========================================================================

    pub fn hard_state(&self) -> HardState {
        self.hard_state.lock().current()
    }

    /// Persist the consensus hard state (always fsynced)
    pub fn set_hard_state(&self, state: HardState) -> Result<()> {
        self.hard_state.lock().save(state)
    }

    // =========================================================================
    // Compaction / Durability
    // =========================================================================

    /// Drop rotated segments wholly covered by a snapshot at `meta.index`.
    ///
    /// If the snapshot is ahead of the whole log, the log restarts with a
    /// single empty entry at the snapshot's index and term so appends can
    /// continue from `meta.index + 1`. Either way `term(meta.index)` keeps
    /// answering until the store is closed.
    pub fn compact(&self, meta: SnapshotMeta) -> Result<()> {
        if meta.is_empty() {
            return Err(StoreError::EmptySnapshotMeta);
        }

        let mut writer = self.writer.lock();
        if meta.index > self.index.read().last_index {
            return self.restart_at(&mut writer, meta);
        }

        let mut index = self.index.write();
        if meta.index > index.compacted.index {
            index.compacted = meta;
        }
        let covered: Vec<u64> = index
            .sealed
            .values()
            .filter(|info| info.range_last <= meta.index)
            .map(|info| info.range_first)
            .collect();
        for range_first in &covered {
            if let Some(info) = index.sealed.get(range_first) {
                if let Err(err) = fs::remove_file(&info.path).at(&info.path, self.shard_id) {
                    index.recompute_first_index();
                    return Err(err);
                }
            }
            index.sealed.remove(range_first);
        }
        index.recompute_first_index();
        let first_index = index.first_index;
        drop(index);
        drop(writer);

        if !covered.is_empty() {
            sync_dir(&self.dir, self.shard_id)?;
        }
        self.meta_cache.lock().retain(|(first, _)| !covered.contains(first));
        self.cache.write().evict_before(first_index);

        info!(
            shard_id = self.shard_id,
            snapshot_index = meta.index,
            removed = covered.len(),
            first_index,
            "compacted log"
        );
        Ok(())
    }

    fn restart_at(&self, writer: &mut SegmentWriter, meta: SnapshotMeta) -> Result<()> {
        let mut index = self.index.write();
        while let Some((_, info)) = index.sealed.pop_first() {
            if let Err(err) = fs::remove_file(&info.path).at(&info.path, self.shard_id) {
                index.sealed.insert(info.range_first, info);
                index.recompute_first_index();
                return Err(err);
            }
        }
        index.recompute_first_index();

        let range = segment_range(meta.index, self.capacity);
        let current_path = self.dir.join(current_file_name(self.shard_id));
        let marker = LogEntry::new(meta.index, meta.term, Bytes::new());

        // The current file is truncated from here on, so the old writer no
        // longer matches it whatever happens next.
        writer.mark_broken();
        let mut next = SegmentWriter::create(
            &current_path,
            self.shard_id,
            self.capacity,
            range,
            &self.pools.meta,
        )?;
        let row = next.append(&marker, &self.pools.entry_head)?;
        next.sync(&self.pools.meta)?;
        sync_dir(&self.dir, self.shard_id)?;
        mem::replace(writer, next).abandon();

        index.active = ActiveSegment {
            path: current_path,
            rows: vec![row],
        };
        index.first_index = meta.index;
        index.last_index = meta.index;
        index.compacted = meta;
        drop(index);

        self.meta_cache.lock().clear();
        {
            let mut cache = self.cache.write();
            cache.clear();
            cache.append(std::slice::from_ref(&marker));
        }

        warn!(
            shard_id = self.shard_id,
            snapshot_index = meta.index,
            snapshot_term = meta.term,
            "log restarted behind snapshot"
        );
        Ok(())
    }

    /// Force every appended entry to disk
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        self.check_writer(&writer)?;
        writer.sync(&self.pools.meta)
    }

    /// Sync and release all file handles
    pub fn close(self) -> Result<()> {
        self.sync()?;
        info!(
            shard_id = self.shard_id,
            last_index = self.last_index(),
            "closed log"
        );
        Ok(())
    }
}

fn sync_dir(dir: &Path, shard_id: u64) -> Result<()> {
    File::open(dir).and_then(|d| d.sync_all()).at(dir, shard_id)
}
