//! Error types for shardstore
//!
//! Provides a unified error type for all operations. Every variant maps to a
//! stable reason code (see [`StoreError::reason`]) so an external reporter can
//! render `{reason, message}` values instead of opaque text.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for shardstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Input Errors
    // -------------------------------------------------------------------------
    #[error("kv pair in bad format: {0}")]
    BadValue(String),

    #[error("output buffer too small: need {need} got {got}")]
    OutOfBuffer { need: u32, got: usize },

    #[error("{what} needs {min} bytes at least, got {got}")]
    DataTooSmall {
        what: &'static str,
        min: u32,
        got: u32,
    },

    #[error("buffer size is {buf_size}, kv size is {record_size}")]
    RecordSizeOut { buf_size: u32, record_size: u32 },

    #[error("total kv size is {kv_len}, key size is {key_len}")]
    KeySizeOut { kv_len: u32, key_len: u32 },

    #[error("{what} size {got} exceeds limit {limit}")]
    SizeLimitExceeded {
        what: &'static str,
        limit: u64,
        got: u64,
    },

    // -------------------------------------------------------------------------
    // Corruption Errors
    // -------------------------------------------------------------------------
    #[error("{what} checksum mismatch, read {read:X}, calc {calc:X}")]
    ChecksumMismatch {
        what: &'static str,
        read: u32,
        calc: u32,
    },

    #[error("{path}: {what} crc mismatch, read {read:X}, calc {calc:X}")]
    CrcNotMatch {
        path: PathBuf,
        what: &'static str,
        read: u32,
        calc: u32,
    },

    // -------------------------------------------------------------------------
    // Structural Mismatches
    // -------------------------------------------------------------------------
    #[error("store kv size mismatch, calc {calc:X}, got {got:X}")]
    StoreSizeMismatch { calc: u32, got: u32 },

    #[error("bad snapshot magic, want {want:X}, got {got:X}")]
    BadSnapshotMagic { want: u32, got: u32 },

    #[error("read store pack size mismatch, want {want:X}, got {got:X}")]
    SnapshotSizeMismatch { want: u32, got: u32 },

    #[error("read store kv num too many, at most {most:X}, got {got:X}")]
    SnapshotRecordCountTooLarge { most: u32, got: u32 },

    #[error("read store kv size mismatch, want {want:X}, got {got:X}")]
    SnapshotPayloadMismatch { want: u32, got: u32 },

    #[error("read store kv num mismatch, want {want:X}, got {got:X}")]
    SnapshotRecordCountMismatch { want: u32, got: u32 },

    #[error("snapshot record {position} is not in ascending key order")]
    SnapshotKeyDisorder { position: u32 },

    // -------------------------------------------------------------------------
    // Version Errors
    // -------------------------------------------------------------------------
    #[error("unknown snapshot version {0}")]
    UnknownSnapshotVersion(u32),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("shard {shard_id}: append starts at index {got}, expected {expected}")]
    LastIndexNotMatch {
        shard_id: u64,
        expected: u64,
        got: u64,
    },

    #[error("shard {shard_id}: range [{lo}, {hi}) outside stored [{first}, {last}]")]
    IndexOutOfRange {
        shard_id: u64,
        lo: u64,
        hi: u64,
        first: u64,
        last: u64,
    },

    #[error("shard {shard_id}: index {index} compacted, first retained is {first}")]
    IndexCompacted {
        shard_id: u64,
        index: u64,
        first: u64,
    },

    #[error("{path}: log file incomplete: {detail}")]
    LogFileIncomplete { path: PathBuf, detail: String },

    #[error("shard {shard_id}: log files missing between index {after} and {next}")]
    SegmentGap {
        shard_id: u64,
        after: u64,
        next: u64,
    },

    #[error("shard {shard_id}: log file {path} overlaps index {index}")]
    SegmentOverlap {
        shard_id: u64,
        path: PathBuf,
        index: u64,
    },

    #[error("cannot access log dir {path}: {source}")]
    LogDirAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: bad meta: {detail}")]
    BadMeta { path: PathBuf, detail: String },

    #[error("{path}: bad magic {got:X}")]
    BadMagic { path: PathBuf, got: u32 },

    #[error("hard state is empty")]
    EmptyHardState,

    #[error("snapshot meta is empty")]
    EmptySnapshotMeta,

    #[error("shard {shard_id}: no valid hard state file among {found} found")]
    NoValidHardState { shard_id: u64, found: usize },

    #[error("file name {0:?} does not match the log naming convention")]
    FileNameNotMatch(String),

    #[error("shard {shard_id}: log writer broken after a failed rollback")]
    LogWriterBroken { shard_id: u64 },

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shard {shard_id}: IO error on {path}: {source}")]
    File {
        path: PathBuf,
        shard_id: u64,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Configuration / Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("worker thread panicked: {0}")]
    WorkerPanicked(&'static str),
}

impl StoreError {
    /// Stable reason code for the external error reporter.
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::BadValue(_) => "BadValue",
            StoreError::OutOfBuffer { .. } => "OutOfBuffer",
            StoreError::DataTooSmall { .. } => "DataTooSmall",
            StoreError::RecordSizeOut { .. } => "KeyValueSizeOut",
            StoreError::KeySizeOut { .. } => "KeySizeOut",
            StoreError::SizeLimitExceeded { .. } => "SizeLimitExceeded",
            StoreError::ChecksumMismatch { .. } => "ChecksumMismatch",
            StoreError::CrcNotMatch { .. } => "CrcNotMatch",
            StoreError::StoreSizeMismatch { .. } => "StoreKvSizeMismatch",
            StoreError::BadSnapshotMagic { .. } => "BadSnapshotMagic",
            StoreError::SnapshotSizeMismatch { .. } => "SnapshotPackageSizeMismatch",
            StoreError::SnapshotRecordCountTooLarge { .. } => "SnapshotKvNumTooMany",
            StoreError::SnapshotPayloadMismatch { .. } => "SnapshotKvSizeMismatch",
            StoreError::SnapshotRecordCountMismatch { .. } => "SnapshotKvNumMismatch",
            StoreError::SnapshotKeyDisorder { .. } => "SnapshotKeyDisorder",
            StoreError::UnknownSnapshotVersion(_) => "UnknownSnapshotVer",
            StoreError::LastIndexNotMatch { .. } => "LastIndexNotMatch",
            StoreError::IndexOutOfRange { .. } => "IndexOutOfRange",
            StoreError::IndexCompacted { .. } => "IndexCompacted",
            StoreError::LogFileIncomplete { .. } => "LogFileIncomplete",
            StoreError::SegmentGap { .. } => "LossLogFileInMiddle",
            StoreError::SegmentOverlap { .. } => "LogFileOverlap",
            StoreError::LogDirAccess { .. } => "LogDirCannotAccess",
            StoreError::BadMeta { .. } => "BadMeta",
            StoreError::BadMagic { .. } => "BadMagic",
            StoreError::EmptyHardState => "EmptyHardState",
            StoreError::EmptySnapshotMeta => "EmptySnapshotMeta",
            StoreError::NoValidHardState { .. } => "NoHardStateFile",
            StoreError::FileNameNotMatch(_) => "FileNameNotMatch",
            StoreError::LogWriterBroken { .. } => "LogWriterBroken",
            StoreError::Io(_) | StoreError::File { .. } => "IoError",
            StoreError::Config(_) => "BadConfig",
            StoreError::WorkerPanicked(_) => "WorkerPanicked",
        }
    }

    /// Whether the error means persisted data cannot be trusted.
    ///
    /// A node seeing one of these at startup must not join the cluster with
    /// what it has on disk.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::ChecksumMismatch { .. }
                | StoreError::CrcNotMatch { .. }
                | StoreError::StoreSizeMismatch { .. }
                | StoreError::BadSnapshotMagic { .. }
                | StoreError::SnapshotSizeMismatch { .. }
                | StoreError::SnapshotRecordCountTooLarge { .. }
                | StoreError::SnapshotPayloadMismatch { .. }
                | StoreError::SnapshotRecordCountMismatch { .. }
                | StoreError::SnapshotKeyDisorder { .. }
                | StoreError::UnknownSnapshotVersion(_)
                | StoreError::LogFileIncomplete { .. }
                | StoreError::SegmentGap { .. }
                | StoreError::SegmentOverlap { .. }
                | StoreError::BadMeta { .. }
                | StoreError::BadMagic { .. }
                | StoreError::NoValidHardState { .. }
                | StoreError::FileNameNotMatch(_)
        )
    }

    /// Render as the `{reason, message}` value consumed by the reporter.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            reason: self.reason(),
            message: self.to_string(),
        }
    }
}

/// Structured error value handed to the external reporting collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub reason: &'static str,
    pub message: String,
}

impl From<&StoreError> for ErrorReport {
    fn from(err: &StoreError) -> Self {
        err.report()
    }
}

/// Attach path and shard context to raw I/O results
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path, shard_id: u64) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &Path, shard_id: u64) -> Result<T> {
        self.map_err(|source| StoreError::File {
            path: path.to_path_buf(),
            shard_id,
            source,
        })
    }
}
