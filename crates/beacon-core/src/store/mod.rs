//! Key-value persistence for [`RunState`] records.
//!
//! Every backend offers the same five operations and no transactions.
//! Writes are guarded by the record's `revision`: `update` only lands if
//! the stored revision still matches the handle the caller read, and `put`
//! only creates. Losers of a race get [`BeaconError::Conflict`] and are
//! expected to re-read and retry.
//!
//! [`BeaconError::Conflict`]: crate::error::BeaconError::Conflict

pub mod fs;
#[cfg(test)]
pub mod memory;
pub mod slack;

pub use fs::FsStore;
#[cfg(test)]
pub use memory::MemoryStore;
pub use slack::SlackStore;

use crate::error::Result;
use crate::state::RunState;
use chrono::{DateTime, Utc};

/// Identifies one physical record and the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHandle {
    /// Backend-specific key: a file stem, a message timestamp, ...
    pub key: String,
    pub revision: u64,
}

#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub handle: RecordHandle,
    pub written_at: DateTime<Utc>,
    pub state: RunState,
}

#[derive(Debug, Clone)]
pub enum RecordBody {
    Parsed(RunState),
    Malformed(String),
}

/// One record seen during a full scan. Malformed bodies are reported, not
/// raised, so a single bad record cannot abort the scan.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub handle: RecordHandle,
    pub written_at: DateTime<Utc>,
    pub body: RecordBody,
}

impl ScanEntry {
    pub fn run_id(&self) -> Option<&str> {
        match &self.body {
            RecordBody::Parsed(state) => Some(&state.run_id),
            RecordBody::Malformed(_) => None,
        }
    }
}

pub trait StateStore {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// The current record for `run_id`. When duplicates exist, the most
    /// recently written one.
    fn get(&self, run_id: &str) -> Result<Option<StoredRecord>>;

    /// Create the record for `state.run_id`. Fails with `Conflict` if one
    /// already exists.
    fn put(&self, state: &RunState) -> Result<StoredRecord>;

    /// Replace the record behind `handle`. Fails with `Conflict` if it was
    /// written since `handle` was read, `NotFound` if it is gone.
    fn update(&self, handle: &RecordHandle, state: &RunState) -> Result<StoredRecord>;

    /// Every record in the store, including unparseable ones.
    fn scan(&self) -> Result<Vec<ScanEntry>>;

    fn delete(&self, handle: &RecordHandle) -> Result<()>;
}

/// Copy of `state` stamped with the revision a write is about to store.
pub(crate) fn next_revision(state: &RunState, previous: u64) -> RunState {
    let mut next = state.clone();
    next.revision = previous + 1;
    next
}
