//! Hot entry cache
//!
//! A bounded window of the most recently appended entries, served to readers
//! without touching the segment files.

use std::collections::VecDeque;

use super::entry::{EntryBatch, LogEntry};

#[derive(Debug)]
pub(crate) struct EntryCache {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl EntryCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append entries that directly follow the cached window.
    ///
    /// A batch that does not follow it replaces the window.
    pub(crate) fn append(&mut self, batch: &[LogEntry]) {
        if self.capacity == 0 {
            return;
        }
        if let (Some(last), Some(next)) = (self.entries.back(), batch.first()) {
            if next.index != last.index + 1 {
                self.entries.clear();
            }
        }

        let skip = batch.len().saturating_sub(self.capacity);
        self.entries.extend(batch[skip..].iter().cloned());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub(crate) fn first_index(&self) -> Option<u64> {
        self.entries.front().map(|e| e.index)
    }

    pub(crate) fn get(&self, index: u64) -> Option<&LogEntry> {
        let first = self.first_index()?;
        let pos = index.checked_sub(first)?;
        self.entries.get(pos as usize)
    }

    /// Push cached entries `[lo, hi)` into `batch`, returning the next index
    /// still to be read
    pub(crate) fn read_into(&self, lo: u64, hi: u64, batch: &mut EntryBatch) -> u64 {
        let mut next = lo;
        while next < hi {
            let Some(entry) = self.get(next) else { break };
            if !batch.push(entry.clone()) {
                break;
            }
            next += 1;
        }
        next
    }

    /// Drop cached entries below `index`
    pub(crate) fn evict_before(&mut self, index: u64) {
        while self.entries.front().map_or(false, |e| e.index < index) {
            self.entries.pop_front();
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
