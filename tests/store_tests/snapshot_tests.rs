//! Tests for the whole-store snapshot codec
//!
//! These tests verify:
//! - Header layout and the empty snapshot
//! - Each decode check and the reason code it surfaces
//! - Checksum sensitivity
//! - The streaming encoder's own consistency checks

use proptest::prelude::*;
use shardstore::buffer::BufferPool;
use shardstore::error::StoreError;
use shardstore::store::{
    decode_store, encode_store, KeyRecord, KvStore, SnapshotEncoder, MIN_STORE_SIZE,
    SNAPSHOT_MAGIC, STORE_HEAD_SIZE,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn sample_snapshot() -> Vec<u8> {
    let store = KvStore::new();
    store.set(b"alpha", b"1").unwrap();
    store.set(b"beta", b"22").unwrap();
    store.set(b"gamma", b"333").unwrap();
    store.snapshot().unwrap()
}

/// Recompute the trailing CRC after editing a snapshot
fn reseal(buf: &mut [u8]) {
    let at = buf.len() - 4;
    let crc = crc32fast::hash(&buf[..at]);
    buf[at..].copy_from_slice(&crc.to_le_bytes());
}

fn set_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_empty_snapshot() {
    let snapshot = KvStore::new().snapshot().unwrap();

    assert_eq!(snapshot.len(), MIN_STORE_SIZE as usize);
    assert_eq!(&snapshot[0..4], &SNAPSHOT_MAGIC.to_le_bytes());
    assert_eq!(&snapshot[4..8], &0u32.to_le_bytes());
    assert_eq!(&snapshot[8..12], &0u32.to_le_bytes());
    assert_eq!(&snapshot[12..16], &0u32.to_le_bytes());

    let decoded = decode_store(&snapshot).unwrap();
    assert!(decoded.records.is_empty());
    assert_eq!(decoded.payload_size, 0);
}

#[test]
fn test_header_counts() {
    let snapshot = sample_snapshot();
    let payload = (12 + 6) + (12 + 6) + (12 + 8);

    assert_eq!(&snapshot[8..12], &3u32.to_le_bytes());
    assert_eq!(&snapshot[12..16], &(payload as u32).to_le_bytes());
    assert_eq!(snapshot.len(), MIN_STORE_SIZE as usize + payload);
}

#[test]
fn test_encode_store_matches_store_snapshot() {
    let pool = BufferPool::new(64);
    let records = vec![
        KeyRecord::new(b"alpha", b"1").unwrap(),
        KeyRecord::new(b"beta", b"22").unwrap(),
        KeyRecord::new(b"gamma", b"333").unwrap(),
    ];
    let payload: u32 = records.iter().map(|r| r.pack_size()).sum();

    let encoded = encode_store(records.iter(), payload, &pool).unwrap();
    assert_eq!(encoded, sample_snapshot());
}

#[test]
fn test_record_larger_than_scratch_block() {
    let pool = BufferPool::new(16);
    let records = vec![KeyRecord::new(b"big", &[7u8; 1000]).unwrap()];
    let payload = records[0].pack_size();

    let encoded = encode_store(records.iter(), payload, &pool).unwrap();
    let decoded = decode_store(&encoded).unwrap();
    assert_eq!(decoded.records[0].value(), &[7u8; 1000][..]);
}

// =============================================================================
// Decode Validation Tests
// =============================================================================

#[test]
fn test_decode_too_small() {
    let result = decode_store(&[0u8; 19]);
    assert!(matches!(result, Err(StoreError::DataTooSmall { .. })));
}

#[test]
fn test_decode_bad_magic() {
    let mut snapshot = sample_snapshot();
    set_u32(&mut snapshot, 0, 0xDEAD);

    let result = decode_store(&snapshot);
    assert!(matches!(result, Err(StoreError::BadSnapshotMagic { got: 0xDEAD, .. })));
}

#[test]
fn test_decode_unknown_version() {
    let mut snapshot = sample_snapshot();
    set_u32(&mut snapshot, 4, 7);
    reseal(&mut snapshot);

    let err = decode_store(&snapshot).unwrap_err();
    assert!(matches!(err, StoreError::UnknownSnapshotVersion(7)));
    assert_eq!(err.reason(), "UnknownSnapshotVer");
}

#[test]
fn test_decode_checksum_mismatch() {
    let mut snapshot = sample_snapshot();
    let last = snapshot.len() - 1;
    snapshot[last] ^= 0x01;

    let result = decode_store(&snapshot);
    assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
}

#[test]
fn test_decode_length_mismatch() {
    let mut snapshot = sample_snapshot();
    set_u32(&mut snapshot, 12, 10);
    reseal(&mut snapshot);

    let err = decode_store(&snapshot).unwrap_err();
    assert!(matches!(err, StoreError::SnapshotSizeMismatch { .. }));
    assert_eq!(err.reason(), "SnapshotPackageSizeMismatch");
}

#[test]
fn test_decode_count_too_large() {
    let mut snapshot = sample_snapshot();
    set_u32(&mut snapshot, 8, 1000);
    reseal(&mut snapshot);

    let err = decode_store(&snapshot).unwrap_err();
    assert!(matches!(err, StoreError::SnapshotRecordCountTooLarge { .. }));
    assert_eq!(err.reason(), "SnapshotKvNumTooMany");
}

#[test]
fn test_decode_count_mismatch() {
    let mut snapshot = sample_snapshot();
    set_u32(&mut snapshot, 8, 2);
    reseal(&mut snapshot);

    let err = decode_store(&snapshot).unwrap_err();
    assert!(matches!(
        err,
        StoreError::SnapshotRecordCountMismatch { want: 2, got: 3 }
    ));
}

#[test]
fn test_decode_keys_out_of_order() {
    let pool = BufferPool::new(64);
    let records = vec![
        KeyRecord::new(b"b", b"1").unwrap(),
        KeyRecord::new(b"a", b"2").unwrap(),
    ];
    let payload: u32 = records.iter().map(|r| r.pack_size()).sum();
    let encoded = encode_store(records.iter(), payload, &pool).unwrap();

    let result = decode_store(&encoded);
    assert!(matches!(result, Err(StoreError::SnapshotKeyDisorder { position: 1 })));
}

#[test]
fn test_decode_corrupt_record_inside_valid_envelope() {
    let mut snapshot = sample_snapshot();
    let record_start = STORE_HEAD_SIZE as usize;
    snapshot[record_start + 9] ^= 0x40;
    reseal(&mut snapshot);

    let result = decode_store(&snapshot);
    assert!(matches!(
        result,
        Err(StoreError::ChecksumMismatch { what: "kv", .. })
    ));
}

// =============================================================================
// Encoder Consistency Tests
// =============================================================================

#[test]
fn test_encoder_payload_mismatch() {
    let pool = BufferPool::new(64);
    let record = KeyRecord::new(b"k", b"v").unwrap();
    let mut out = Vec::new();

    let mut encoder = SnapshotEncoder::begin(&mut out, 1, record.pack_size() + 1, &pool).unwrap();
    encoder.push(&record).unwrap();

    let err = encoder.finish().unwrap_err();
    assert!(matches!(err, StoreError::StoreSizeMismatch { .. }));
    assert_eq!(err.reason(), "StoreKvSizeMismatch");
}

#[test]
fn test_encoder_count_mismatch() {
    let pool = BufferPool::new(64);
    let record = KeyRecord::new(b"k", b"v").unwrap();
    let mut out = Vec::new();

    let mut encoder = SnapshotEncoder::begin(&mut out, 2, record.pack_size(), &pool).unwrap();
    encoder.push(&record).unwrap();

    let result = encoder.finish();
    assert!(matches!(
        result,
        Err(StoreError::SnapshotRecordCountMismatch { want: 2, got: 1 })
    ));
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn snapshot_rejects_any_flipped_bit(bit in any::<prop::sample::Index>()) {
        let mut snapshot = sample_snapshot();
        let bit = bit.index(snapshot.len() * 8);
        snapshot[bit / 8] ^= 1 << (bit % 8);

        let result = decode_store(&snapshot);
        prop_assert!(result.is_err());
        if bit >= 64 {
            let is_checksum = matches!(result, Err(StoreError::ChecksumMismatch { .. }));
            prop_assert!(is_checksum);
        }
    }
}
