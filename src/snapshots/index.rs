//! Snapshot index: id to metadata/offset mapping.

use crate::error::{DatabaseError, Result};
use crate::types::{SnapshotId, SnapshotInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// Magic bytes for the index file.
const INDEX_MAGIC: &[u8; 4] = b"SIX\0";

/// Current index format version.
const INDEX_VERSION: u8 = 1;

/// Index over all snapshots in a database.
///
/// Kept fully in memory and rewritten after every snapshot write; the
/// snapshot log remains the source of truth for payloads.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotIndex {
    /// All snapshot metadata by id. BTreeMap keeps listing ordered.
    pub snapshots: BTreeMap<i64, SnapshotInfo>,

    /// Next snapshot id to assign (ids start at 0, never reused).
    pub next_id: i64,

    /// Current snapshot, if one has been set.
    pub current: Option<SnapshotId>,
}

impl SnapshotIndex {
    /// Look up snapshot metadata by id.
    pub fn get(&self, id: SnapshotId) -> Option<&SnapshotInfo> {
        self.snapshots.get(&id.0)
    }

    /// Whether a snapshot with this id exists.
    pub fn contains(&self, id: SnapshotId) -> bool {
        self.snapshots.contains_key(&id.0)
    }

    /// Number of snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the index holds no snapshots.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Drop entries at or beyond a log offset (journal rollback).
    ///
    /// Restores `next_id` from the surviving entries and clears the
    /// current snapshot if it was removed.
    pub fn prune_beyond(&mut self, log_size: u64) {
        self.snapshots.retain(|_, info| info.offset < log_size);
        self.next_id = self.snapshots.keys().max().map_or(0, |max| max + 1);
        if let Some(current) = self.current {
            if !self.contains(current) {
                self.current = None;
            }
        }
    }

    /// Save the index to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        file.write_all(INDEX_MAGIC)?;
        file.write_all(&[INDEX_VERSION])?;

        let encoded =
            rmp_serde::to_vec(self).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        file.write_all(&encoded)?;

        file.sync_all()?;
        Ok(())
    }

    /// Load an index from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(DatabaseError::InvalidFormat("Invalid index magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != INDEX_VERSION {
            return Err(DatabaseError::InvalidFormat(format!(
                "Unsupported index version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;

        rmp_serde::from_slice(&encoded).map_err(|e| DatabaseError::Parse(e.to_string()))
    }
}
