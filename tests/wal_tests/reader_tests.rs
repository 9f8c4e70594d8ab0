//! Tests for reading entries back from the segment store
//!
//! These tests verify:
//! - Range reads served from the cache, the segment files or both
//! - Byte-budgeted reads
//! - Range validation and term lookups

use tempfile::TempDir;

use shardstore::error::StoreError;
use shardstore::wal::{LogSegmentStore, NO_LIMIT};

use super::{indices, make_entries, open_log};

/// Capacity-4 log holding entries 1..=10; the cache holds 7..=10
fn filled_log(dir: &TempDir) -> LogSegmentStore {
    let log = open_log(dir.path(), 4);
    log.store_entries(&make_entries(1, 11)).unwrap();
    log
}

#[test]
fn test_read_from_cache() {
    let dir = TempDir::new().unwrap();
    let log = filled_log(&dir);

    let (entries, compacted) = log.entries(8, 11, NO_LIMIT).unwrap();
    assert!(!compacted);
    assert_eq!(entries, make_entries(8, 11));
}

#[test]
fn test_read_from_sealed_segments() {
    let dir = TempDir::new().unwrap();
    let log = filled_log(&dir);

    let (entries, _) = log.entries(2, 6, NO_LIMIT).unwrap();
    assert_eq!(entries, make_entries(2, 6));
}

#[test]
fn test_read_spanning_disk_and_cache() {
    let dir = TempDir::new().unwrap();
    let log = filled_log(&dir);

    let (entries, _) = log.entries(3, 10, NO_LIMIT).unwrap();
    assert_eq!(indices(&entries), (3..10).collect::<Vec<_>>());
    assert_eq!(entries, make_entries(3, 10));
}

#[test]
fn test_read_empty_range() {
    let dir = TempDir::new().unwrap();
    let log = filled_log(&dir);

    let (entries, compacted) = log.entries(5, 5, NO_LIMIT).unwrap();
    assert!(entries.is_empty());
    assert!(!compacted);

    let (entries, _) = log.entries(11, 11, NO_LIMIT).unwrap();
    assert!(entries.is_empty());
}

#[test]
fn test_read_byte_budget() {
    let dir = TempDir::new().unwrap();
    let log = filled_log(&dir);
    let per_entry = make_entries(1, 2)[0].encoded_size();

    let (entries, _) = log.entries(1, 11, per_entry * 2).unwrap();
    assert_eq!(indices(&entries), vec![1, 2]);

    let (entries, _) = log.entries(1, 11, per_entry * 2 + 1).unwrap();
    assert_eq!(indices(&entries), vec![1, 2]);

    let (entries, _) = log.entries(7, 11, per_entry * 3).unwrap();
    assert_eq!(indices(&entries), vec![7, 8, 9]);
}

#[test]
fn test_read_returns_at_least_one_entry() {
    let dir = TempDir::new().unwrap();
    let log = filled_log(&dir);

    let (entries, _) = log.entries(2, 11, 1).unwrap();
    assert_eq!(indices(&entries), vec![2]);

    let (entries, _) = log.entries(9, 11, 1).unwrap();
    assert_eq!(indices(&entries), vec![9]);
}

#[test]
fn test_read_out_of_range() {
    let dir = TempDir::new().unwrap();
    let log = filled_log(&dir);

    let err = log.entries(1, 12, NO_LIMIT).unwrap_err();
    assert!(matches!(
        err,
        StoreError::IndexOutOfRange { lo: 1, hi: 12, first: 1, last: 10, .. }
    ));
    assert_eq!(err.reason(), "IndexOutOfRange");

    let err = log.entries(6, 5, NO_LIMIT).unwrap_err();
    assert!(matches!(err, StoreError::IndexOutOfRange { .. }));
}

#[test]
fn test_read_on_empty_log() {
    let dir = TempDir::new().unwrap();
    let log = open_log(dir.path(), 4);

    let (entries, compacted) = log.entries(1, 1, NO_LIMIT).unwrap();
    assert!(entries.is_empty());
    assert!(!compacted);
    assert!(log.entries(1, 2, NO_LIMIT).is_err());
}

#[test]
fn test_term_lookup() {
    let dir = TempDir::new().unwrap();
    let log = open_log(dir.path(), 4);

    let mut entries = make_entries(1, 7);
    for entry in entries.iter_mut() {
        entry.term = (entry.index + 1) / 2;
    }
    log.store_entries(&entries).unwrap();

    assert_eq!(log.term(1).unwrap(), 1);
    assert_eq!(log.term(4).unwrap(), 2);
    assert_eq!(log.term(6).unwrap(), 3);

    let err = log.term(7).unwrap_err();
    assert!(matches!(err, StoreError::IndexOutOfRange { .. }));
}

#[test]
fn test_reads_while_appending() {
    let dir = TempDir::new().unwrap();
    let log = open_log(dir.path(), 4);

    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 1..=60 {
                log.store_entries(&make_entries(i, i + 1)).unwrap();
            }
        });

        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..200 {
                    let last = log.last_index();
                    let (entries, compacted) = log.entries(1, last + 1, NO_LIMIT).unwrap();
                    assert!(!compacted);
                    assert_eq!(indices(&entries), (1..=last).collect::<Vec<_>>());
                }
            });
        }
    });

    assert_eq!(log.last_index(), 60);
}
