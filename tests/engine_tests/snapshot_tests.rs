//! Tests for snapshots through the engine

use std::fs;

use tempfile::TempDir;

use shardstore::error::StoreError;
use shardstore::wal::{segment_file_name, SnapshotMeta, NO_LIMIT};

use super::{commit, open_engine, set_entries, set_entry};

#[test]
fn test_snapshot_labelled_with_applied_position() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());
    engine.append(&set_entries(1, 5)).unwrap();
    commit(&engine, 5);
    engine.apply_committed().unwrap();

    let (bytes, meta) = engine.snapshot().unwrap();
    assert_eq!(meta, SnapshotMeta { index: 5, term: 1 });
    assert_eq!(bytes.len() as u64, engine.store().snapshot_size());
}

#[test]
fn test_install_snapshot_on_fresh_engine() {
    let source_dir = TempDir::new().unwrap();
    let source = open_engine(source_dir.path());
    source.append(&set_entries(1, 12)).unwrap();
    commit(&source, 12);
    source.apply_committed().unwrap();
    let (bytes, meta) = source.snapshot().unwrap();

    let target_dir = TempDir::new().unwrap();
    let target = open_engine(target_dir.path());
    target.install_snapshot(&bytes, meta).unwrap();

    assert_eq!(target.applied_index(), 12);
    assert_eq!(target.store().len(), 12);
    assert_eq!(target.get(b"key0003"), Some(b"value3".to_vec()));
    assert_eq!(target.log().first_index(), 12);
    assert_eq!(target.log().last_index(), 12);

    target.append(&[set_entry(13, 2, "late", "entry")]).unwrap();
    commit(&target, 13);
    assert_eq!(target.apply_committed().unwrap(), 13);
    assert_eq!(target.get(b"late"), Some(b"entry".to_vec()));
}

#[test]
fn test_install_snapshot_behind_log_compacts() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());
    engine.append(&set_entries(1, 30)).unwrap();
    commit(&engine, 20);
    engine.apply_committed().unwrap();
    let (bytes, meta) = engine.snapshot().unwrap();

    engine.install_snapshot(&bytes, meta).unwrap();
    assert_eq!(engine.log().first_index(), 17);
    assert_eq!(engine.log().last_index(), 30);

    let (_, compacted) = engine.log().entries(10, 20, NO_LIMIT).unwrap();
    assert!(compacted);

    commit(&engine, 30);
    assert_eq!(engine.apply_committed().unwrap(), 30);
    assert_eq!(engine.store().len(), 30);
}

#[test]
fn test_install_corrupt_snapshot_keeps_state() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());
    engine.append(&set_entries(1, 4)).unwrap();
    commit(&engine, 4);
    engine.apply_committed().unwrap();

    let (mut bytes, _) = engine.snapshot().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    let err = engine
        .install_snapshot(&bytes, SnapshotMeta { index: 40, term: 3 })
        .unwrap_err();
    assert!(err.is_corruption());
    assert_eq!(engine.applied_index(), 4);
    assert_eq!(engine.store().len(), 4);
    assert_eq!(engine.log().last_index(), 4);
}

#[test]
fn test_install_snapshot_failed_compaction_keeps_state() {
    let source_dir = TempDir::new().unwrap();
    let source = open_engine(source_dir.path());
    source.append(&set_entries(1, 12)).unwrap();
    commit(&source, 12);
    source.apply_committed().unwrap();
    let (bytes, meta) = source.snapshot().unwrap();

    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());
    engine.append(&set_entries(1, 20)).unwrap();
    commit(&engine, 4);
    engine.apply_committed().unwrap();

    // A directory in place of the first sealed segment cannot be unlinked
    let sealed = dir.path().join(segment_file_name(1, 1, 8));
    fs::remove_file(&sealed).unwrap();
    fs::create_dir(&sealed).unwrap();

    let err = engine.install_snapshot(&bytes, meta).unwrap_err();
    assert_eq!(err.reason(), "IoError");
    assert_eq!(engine.applied_index(), 4);
    assert_eq!(engine.store().len(), 4);
    assert_eq!(engine.get(b"key0010"), None);
    assert_eq!(engine.log().first_index(), 1);
}

#[test]
fn test_install_snapshot_empty_meta() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());
    let (bytes, meta) = engine.snapshot().unwrap();
    assert!(meta.is_empty());

    let err = engine.install_snapshot(&bytes, meta).unwrap_err();
    assert!(matches!(err, StoreError::EmptySnapshotMeta));
}

#[test]
fn test_snapshot_then_restart_recovers_from_snapshot() {
    let dir = TempDir::new().unwrap();
    let (bytes, meta) = {
        let engine = open_engine(dir.path());
        engine.append(&set_entries(1, 20)).unwrap();
        commit(&engine, 20);
        engine.apply_committed().unwrap();
        let (bytes, meta) = engine.snapshot().unwrap();
        engine.compact(meta).unwrap();
        engine.close().unwrap();
        (bytes, meta)
    };

    let engine = open_engine(dir.path());
    assert!(engine.apply_committed().is_err());

    engine.install_snapshot(&bytes, meta).unwrap();
    assert_eq!(engine.apply_committed().unwrap(), 20);
    assert_eq!(engine.store().len(), 20);
}
