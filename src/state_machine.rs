//! State machine seam
//!
//! What the engine drives with committed entries. The store is the only
//! implementation here; the trait exists so the apply loop does not care.

use tracing::trace;

use crate::error::Result;
use crate::protocol::Command;
use crate::store::{decode_store, DecodedStore, KvStore};

/// Applies committed commands and moves whole-state snapshots in and out.
///
/// Restoring is split in two so a caller can do fallible work of its own
/// between checking a snapshot and swapping it in.
pub trait StateMachine: Send + Sync {
    /// A snapshot that has been fully checked but not installed
    type Decoded;

    /// Apply the command committed at `index`
    fn apply(&self, command: Command, index: u64) -> Result<()>;

    /// Export the full state
    fn snapshot(&self) -> Result<Vec<u8>>;

    /// Check a snapshot without touching the current state
    fn decode_snapshot(&self, snapshot: &[u8]) -> Result<Self::Decoded>;

    /// Replace the full state
    fn install_decoded(&self, decoded: Self::Decoded);
}

impl StateMachine for KvStore {
    type Decoded = DecodedStore;

    fn apply(&self, command: Command, index: u64) -> Result<()> {
        trace!(
            index,
            key = %String::from_utf8_lossy(command.key()),
            "applying command"
        );
        match command {
            Command::Set { key, value } => self.set(&key, &value),
            Command::Del { key } => {
                let existed = self.del(&key);
                trace!(index, existed, "applied delete");
                Ok(())
            }
        }
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        KvStore::snapshot(self)
    }

    fn decode_snapshot(&self, snapshot: &[u8]) -> Result<DecodedStore> {
        decode_store(snapshot)
    }

    fn install_decoded(&self, decoded: DecodedStore) {
        self.install(decoded)
    }
}
