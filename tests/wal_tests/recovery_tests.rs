//! Tests for startup recovery
//!
//! These tests verify:
//! - A closed log reopens with every entry
//! - Data written after the last sync is dropped, never trusted
//! - Gaps, overlaps, bad names and corrupt files fail the open

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use tempfile::TempDir;

use shardstore::config::WalSyncStrategy;
use shardstore::error::StoreError;
use shardstore::wal::{
    meta_region_size, scan_log, segment_file_name, LogSegmentStore, META_HEAD_SIZE, NO_LIMIT,
};

use super::{make_entries, open_log, path_of, small_config, SHARD};

fn write_log(dir: &TempDir, capacity: u32, hi: u64) {
    let log = open_log(dir.path(), capacity);
    log.store_entries(&make_entries(1, hi)).unwrap();
    log.close().unwrap();
}

fn reopen_err(dir: &TempDir, capacity: u32) -> StoreError {
    match LogSegmentStore::open(&small_config(dir.path(), capacity)) {
        Ok(_) => panic!("open should fail"),
        Err(e) => e,
    }
}

fn flip_byte(path: &std::path::Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    std::io::Read::read_exact(&mut file, &mut byte).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[byte[0] ^ 0xFF]).unwrap();
    file.sync_all().unwrap();
}

// =============================================================================
// Clean Reopen
// =============================================================================

#[test]
fn test_reopen_recovers_entries() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 11);

    let log = open_log(dir.path(), 4);
    assert_eq!(log.first_index(), 1);
    assert_eq!(log.last_index(), 10);
    assert_eq!(log.segment_count(), 3);

    let (entries, _) = log.entries(1, 11, NO_LIMIT).unwrap();
    assert_eq!(entries, make_entries(1, 11));

    log.store_entries(&make_entries(11, 14)).unwrap();
    assert_eq!(log.last_index(), 13);
}

#[test]
fn test_reopen_empty_log() {
    let dir = TempDir::new().unwrap();
    open_log(dir.path(), 4).close().unwrap();

    let log = open_log(dir.path(), 4);
    assert_eq!(log.last_index(), 0);
    log.store_entries(&make_entries(1, 3)).unwrap();
}

#[test]
fn test_reopen_after_rotation_with_empty_current() {
    let dir = TempDir::new().unwrap();
    let log = open_log(dir.path(), 4);
    log.store_entries(&make_entries(1, 5)).unwrap();
    log.store_entries(&make_entries(5, 6)).unwrap();
    log.close().unwrap();

    let log = open_log(dir.path(), 4);
    assert_eq!(log.last_index(), 5);
    assert_eq!(log.term(5).unwrap(), 1);
}

#[test]
fn test_full_current_segment_rotated_on_open() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 5);

    let log = open_log(dir.path(), 4);
    assert_eq!(log.segment_count(), 2);
    assert!(path_of(dir.path(), &segment_file_name(SHARD, 1, 4)).exists());
    assert_eq!(log.last_index(), 4);

    log.store_entries(&make_entries(5, 7)).unwrap();
    assert_eq!(log.last_index(), 6);
}

#[test]
fn test_other_shard_files_ignored() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 3);
    fs::write(dir.path().join("log_8.current"), b"not ours").unwrap();
    fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

    let log = open_log(dir.path(), 4);
    assert_eq!(log.last_index(), 2);
}

// =============================================================================
// Unsynced Tail
// =============================================================================

#[test]
fn test_unsynced_tail_dropped() {
    let dir = TempDir::new().unwrap();
    let config = shardstore::config::Config {
        wal_sync_strategy: WalSyncStrategy::Manual,
        ..small_config(dir.path(), 8)
    };

    {
        let log = LogSegmentStore::open(&config).unwrap();
        log.store_entries(&make_entries(1, 4)).unwrap();
        log.sync().unwrap();
        log.store_entries(&make_entries(4, 6)).unwrap();
        // dropped without close
    }

    let scan = scan_log(dir.path(), SHARD, 8).unwrap();
    let current = scan.current.as_ref().unwrap();
    assert!(current.unsynced_tail() > 0);
    assert_eq!(scan.last_index(), Some(3));

    let log = LogSegmentStore::open(&config).unwrap();
    assert_eq!(log.last_index(), 3);
    log.store_entries(&make_entries(4, 5)).unwrap();
    log.close().unwrap();

    let scan = scan_log(dir.path(), SHARD, 8).unwrap();
    assert_eq!(scan.current.unwrap().unsynced_tail(), 0);
}

#[test]
fn test_every_n_entries_syncs_on_threshold() {
    let dir = TempDir::new().unwrap();
    let config = shardstore::config::Config {
        wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 3 },
        ..small_config(dir.path(), 8)
    };

    {
        let log = LogSegmentStore::open(&config).unwrap();
        log.store_entries(&make_entries(1, 3)).unwrap();
        log.store_entries(&make_entries(3, 4)).unwrap();
        log.store_entries(&make_entries(4, 5)).unwrap();
    }

    let log = LogSegmentStore::open(&config).unwrap();
    assert_eq!(log.last_index(), 3);
}

// =============================================================================
// Inconsistent Directories
// =============================================================================

#[test]
fn test_missing_middle_segment() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 14);
    fs::remove_file(path_of(dir.path(), &segment_file_name(SHARD, 5, 8))).unwrap();

    let err = reopen_err(&dir, 4);
    assert!(matches!(err, StoreError::SegmentGap { after: 4, next: 9, .. }));
    assert_eq!(err.reason(), "LossLogFileInMiddle");
    assert!(err.is_corruption());
}

#[test]
fn test_missing_last_sealed_segment() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 11);
    fs::remove_file(path_of(dir.path(), &segment_file_name(SHARD, 5, 8))).unwrap();

    let err = reopen_err(&dir, 4);
    assert!(matches!(err, StoreError::SegmentGap { after: 4, next: 9, .. }));
}

#[test]
fn test_current_overlapping_sealed() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 11);
    fs::copy(
        path_of(dir.path(), &segment_file_name(SHARD, 5, 8)),
        path_of(dir.path(), "log_7.current"),
    )
    .unwrap();

    let err = reopen_err(&dir, 4);
    assert!(matches!(err, StoreError::SegmentOverlap { index: 5, .. }));
    assert_eq!(err.reason(), "LogFileOverlap");
}

#[test]
fn test_bad_file_name() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 3);
    fs::write(dir.path().join("log_7.1-4"), b"").unwrap();

    let err = reopen_err(&dir, 4);
    assert!(matches!(err, StoreError::FileNameNotMatch(_)));
}

#[test]
fn test_misaligned_segment_name() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 3);
    fs::write(dir.path().join(segment_file_name(SHARD, 2, 5)), b"").unwrap();

    let err = reopen_err(&dir, 4);
    assert!(matches!(err, StoreError::BadMeta { .. }));
}

#[test]
fn test_capacity_change_rejected() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 3);

    let err = reopen_err(&dir, 8);
    assert!(matches!(err, StoreError::BadMeta { .. }));
}

#[test]
fn test_corrupt_meta_table() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 11);
    let sealed = path_of(dir.path(), &segment_file_name(SHARD, 1, 4));
    flip_byte(&sealed, META_HEAD_SIZE as u64 + 10);

    let err = reopen_err(&dir, 4);
    assert!(matches!(err, StoreError::CrcNotMatch { what: "meta table", .. }));
    assert!(err.is_corruption());
}

#[test]
fn test_corrupt_meta_magic() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 3);
    flip_byte(&path_of(dir.path(), "log_7.current"), 0);

    let err = reopen_err(&dir, 4);
    assert!(matches!(err, StoreError::BadMagic { .. }));
}

#[test]
fn test_truncated_sealed_segment() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 11);
    let sealed = path_of(dir.path(), &segment_file_name(SHARD, 5, 8));
    let len = fs::metadata(&sealed).unwrap().len();
    OpenOptions::new().write(true).open(&sealed).unwrap().set_len(len - 3).unwrap();

    let err = reopen_err(&dir, 4);
    assert!(matches!(err, StoreError::LogFileIncomplete { .. }));
    assert_eq!(err.reason(), "LogFileIncomplete");
}

#[test]
fn test_truncated_current_segment() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 8, 4);
    let current = path_of(dir.path(), "log_7.current");
    let len = fs::metadata(&current).unwrap().len();
    OpenOptions::new().write(true).open(&current).unwrap().set_len(len - 1).unwrap();

    let err = reopen_err(&dir, 8);
    assert!(matches!(err, StoreError::LogFileIncomplete { .. }));
}

#[test]
fn test_corrupt_entry_in_current_segment() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 8, 4);
    let current = path_of(dir.path(), "log_7.current");
    flip_byte(&current, meta_region_size(8) + 30);

    let err = reopen_err(&dir, 8);
    assert!(matches!(err, StoreError::CrcNotMatch { what: "log entry", .. }));
}

#[test]
fn test_failed_open_leaves_directory_unchanged() {
    let dir = TempDir::new().unwrap();
    write_log(&dir, 4, 14);
    fs::remove_file(path_of(dir.path(), &segment_file_name(SHARD, 5, 8))).unwrap();
    let before = super::file_names(dir.path());

    reopen_err(&dir, 4);
    assert_eq!(super::file_names(dir.path()), before);
}

#[test]
fn test_data_dir_is_a_file() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("plain");
    fs::write(&file, b"x").unwrap();

    let err = match LogSegmentStore::open(&small_config(&file, 4)) {
        Ok(_) => panic!("open should fail"),
        Err(e) => e,
    };
    assert!(matches!(err, StoreError::LogDirAccess { .. }));
    assert_eq!(err.reason(), "LogDirCannotAccess");
}
