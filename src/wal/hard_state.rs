//! Hard state persistence
//!
//! The consensus hard state is rewritten in place across a small ring of
//! files, so a crash can tear at most the newest one.
//!
//! ```text
//! ┌───────────┬─────────┬─────────────┬───────────┬──────────┬──────────┬──────────┬──────────┬────────────┐
//! │ Magic (4) │ CRC (4) │ ShardId (8) │ SeqId (8) │ Size (4) │ Size (4) │ Term (8) │ Vote (8) │ Commit (8) │
//! └───────────┴─────────┴─────────────┴───────────┴──────────┴──────────┴──────────┴──────────┴────────────┘
//! ```
//!
//! The body size is stored twice; the CRC covers everything after itself.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{IoContext, Result, StoreError};

use super::segment::{hard_state_file_name, LOG_MAGIC};

/// magic + crc + shard id + seq id + size + size
pub const HARD_STATE_HEAD_SIZE: usize = 4 + 4 + 8 + 8 + 4 + 4;

/// term + vote + commit
pub const HARD_STATE_BODY_SIZE: usize = 8 + 8 + 8;

pub const HARD_STATE_FILE_SIZE: usize = HARD_STATE_HEAD_SIZE + HARD_STATE_BODY_SIZE;

/// Consensus state that must survive a restart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub term: u64,
    pub vote: u64,
    pub commit: u64,
}

impl HardState {
    pub fn is_empty(&self) -> bool {
        *self == HardState::default()
    }
}

/// Position of the last entry covered by a store snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub index: u64,
    pub term: u64,
}

impl SnapshotMeta {
    pub fn is_empty(&self) -> bool {
        self.index == 0
    }
}

pub fn encode_hard_state(
    shard_id: u64,
    seq_id: u64,
    state: &HardState,
) -> [u8; HARD_STATE_FILE_SIZE] {
    let mut buf = [0u8; HARD_STATE_FILE_SIZE];
    {
        let mut dst = &mut buf[8..];
        dst.put_u64_le(shard_id);
        dst.put_u64_le(seq_id);
        dst.put_u32_le(HARD_STATE_BODY_SIZE as u32);
        dst.put_u32_le(HARD_STATE_BODY_SIZE as u32);
        dst.put_u64_le(state.term);
        dst.put_u64_le(state.vote);
        dst.put_u64_le(state.commit);
    }
    let checksum = crc32fast::hash(&buf[8..]);
    let mut dst = &mut buf[..8];
    dst.put_u32_le(LOG_MAGIC);
    dst.put_u32_le(checksum);
    buf
}

/// Decode one hard-state file, returning `(shard_id, seq_id, state)`
pub fn decode_hard_state(buf: &[u8], path: &Path) -> Result<(u64, u64, HardState)> {
    if buf.len() != HARD_STATE_FILE_SIZE {
        return Err(StoreError::LogFileIncomplete {
            path: path.to_path_buf(),
            detail: format!(
                "hard state needs {} bytes, got {}",
                HARD_STATE_FILE_SIZE,
                buf.len()
            ),
        });
    }

    let mut src = buf;
    let magic = src.get_u32_le();
    if magic != LOG_MAGIC {
        return Err(StoreError::BadMagic {
            path: path.to_path_buf(),
            got: magic,
        });
    }
    let read = src.get_u32_le();
    let calc = crc32fast::hash(&buf[8..]);
    if read != calc {
        return Err(StoreError::CrcNotMatch {
            path: path.to_path_buf(),
            what: "hard state",
            read,
            calc,
        });
    }

    let shard_id = src.get_u64_le();
    let seq_id = src.get_u64_le();
    let size = src.get_u32_le();
    let size_again = src.get_u32_le();
    if size as usize != HARD_STATE_BODY_SIZE || size_again != size {
        return Err(StoreError::BadMeta {
            path: path.to_path_buf(),
            detail: format!("hard state body size {}/{}", size, size_again),
        });
    }

    let state = HardState {
        term: src.get_u64_le(),
        vote: src.get_u64_le(),
        commit: src.get_u64_le(),
    };
    Ok((shard_id, seq_id, state))
}

/// The ring of hard-state files of one shard
#[derive(Debug)]
pub(crate) struct HardStateRing {
    dir: PathBuf,
    shard_id: u64,
    ring_size: u32,
    next_seq: u64,
    current: HardState,
}

impl HardStateRing {
    /// Load the newest valid hard state, falling back to older ring slots
    pub(crate) fn load(dir: &Path, shard_id: u64, ring_size: u32) -> Result<Self> {
        let mut found = 0usize;
        let mut newest: Option<(u64, HardState)> = None;

        for slot in 0..ring_size as u64 {
            let path = dir.join(hard_state_file_name(shard_id, slot, ring_size));
            if !path.exists() {
                continue;
            }
            found += 1;

            let buf = fs::read(&path).at(&path, shard_id)?;
            match decode_hard_state(&buf, &path) {
                Ok((owner, seq_id, state)) if owner == shard_id => {
                    if newest.map_or(true, |(seq, _)| seq_id > seq) {
                        newest = Some((seq_id, state));
                    }
                }
                Ok((owner, _, _)) => {
                    warn!(
                        shard_id,
                        path = %path.display(),
                        owner,
                        "hard state file belongs to another shard"
                    );
                }
                Err(e) => {
                    warn!(
                        shard_id,
                        path = %path.display(),
                        error = %e,
                        "skipping invalid hard state file"
                    );
                }
            }
        }

        let (next_seq, current) = match newest {
            Some((seq_id, state)) => (seq_id + 1, state),
            None if found == 0 => (0, HardState::default()),
            None => return Err(StoreError::NoValidHardState { shard_id, found }),
        };
        debug!(
            shard_id,
            next_seq,
            term = current.term,
            commit = current.commit,
            "loaded hard state"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            shard_id,
            ring_size,
            next_seq,
            current,
        })
    }

    /// Persist `state` into the next ring slot and fsync it
    pub(crate) fn save(&mut self, state: HardState) -> Result<()> {
        if state.is_empty() {
            return Err(StoreError::EmptyHardState);
        }

        let path = self
            .dir
            .join(hard_state_file_name(self.shard_id, self.next_seq, self.ring_size));
        let buf = encode_hard_state(self.shard_id, self.next_seq, &state);

        let mut file = File::create(&path).at(&path, self.shard_id)?;
        file.write_all(&buf).at(&path, self.shard_id)?;
        file.sync_all().at(&path, self.shard_id)?;

        self.next_seq += 1;
        self.current = state;
        Ok(())
    }

    pub(crate) fn current(&self) -> HardState {
        self.current
    }
}
