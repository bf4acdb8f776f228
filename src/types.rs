//! Core types for the database.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a snapshot.
///
/// Assigned once at write time, monotonically increasing from 0 within a
/// database, never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub i64);

impl fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotId({})", self.0)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Seconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_secs() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Content hash (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Hash(arr))
    }

    /// Get the first two characters of the hex (for sharding).
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[0..1])
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The identity an undo entry is attributed to.
///
/// Treated as opaque by the database; equality is by `id` only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

/// A single reversible edit action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndoAction {
    /// Application-defined action type (e.g. "rename", "set_comment").
    pub action_type: String,

    /// Application-defined action data.
    pub data: serde_json::Value,
}

impl UndoAction {
    pub fn new(action_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            action_type: action_type.into(),
            data,
        }
    }
}

/// An immutable, attributed group of edit actions.
///
/// Entries are ordered by recording sequence, not by `timestamp`; the
/// timestamp is client-supplied and may be out of order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndoEntry {
    /// When the entry was committed (unix seconds, client-supplied).
    pub timestamp: Timestamp,

    /// Content hash of the state produced after applying all actions.
    pub hash: Hash,

    /// Identity that performed the edits.
    pub user: User,

    /// Ordered actions in this entry.
    pub actions: Vec<UndoAction>,
}

/// Snapshot metadata held in the index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: SnapshotId,
    pub name: String,
    pub auto_save: bool,
    pub parent: Option<SnapshotId>,
    pub timestamp: Timestamp,

    /// Content address of the file contents captured by this snapshot.
    pub file_hash: Hash,

    /// Offset of the snapshot record in the snapshot log.
    pub offset: u64,
}

/// Database statistics.
#[derive(Clone, Debug, Default)]
pub struct DatabaseStats {
    pub snapshot_count: u64,
    pub global_count: u64,
    pub log_size_bytes: u64,
    pub blob_size_bytes: u64,
}
