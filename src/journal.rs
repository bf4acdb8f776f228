//! Write journal for atomic snapshot writes.
//!
//! Before a snapshot record is appended to the log, the journal records
//! the intended write and the log's current length. The entry is marked
//! committed only after the record, index, and content blob are all
//! durable. On open, an uncommitted entry means the previous process
//! died mid-write: the log is truncated back to the recorded length and
//! the index is pruned, so a snapshot is either fully recorded or absent.

use crate::error::{DatabaseError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"JNL\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Entry size: status + snapshot id + log size + crc32.
const ENTRY_SIZE: usize = 1 + 8 + 8 + 4;

const STATUS_PENDING: u8 = 0;
const STATUS_COMMITTED: u8 = 1;

/// A snapshot write that was started but never committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingWrite {
    /// Snapshot id the write was going to assign.
    pub snapshot_id: i64,

    /// Snapshot log length before the write started.
    pub log_size: u64,
}

/// Journal tracking the single in-flight snapshot write.
///
/// Snapshot writes are serialized by the database write lock, so the
/// journal only ever holds one transaction: `begin` resets the file,
/// `commit` appends the completion marker.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Open a journal at the given path.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Check for an uncommitted write from a previous process.
    ///
    /// A journal that is missing, empty, or torn before the pending entry
    /// was fully written means the log was never touched, so there is
    /// nothing to roll back.
    pub fn pending(&self) -> Result<Option<PendingWrite>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Ok(None),
        };

        let mut header = [0u8; 5];
        if file.read_exact(&mut header).is_err() {
            return Ok(None);
        }
        if &header[0..4] != JOURNAL_MAGIC {
            return Err(DatabaseError::InvalidFormat("Invalid journal magic".into()));
        }
        if header[4] != JOURNAL_VERSION {
            return Err(DatabaseError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                header[4]
            )));
        }

        let first = match Self::read_entry(&mut file) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if first.0 != STATUS_PENDING {
            return Ok(None);
        }

        // A valid committed entry after the pending one means the write
        // finished.
        if let Some((status, id, _)) = Self::read_entry(&mut file) {
            if status == STATUS_COMMITTED && id == first.1 {
                return Ok(None);
            }
        }

        Ok(Some(PendingWrite {
            snapshot_id: first.1,
            log_size: first.2,
        }))
    }

    /// Record the start of a snapshot write.
    pub fn begin(&self, snapshot_id: i64, log_size: u64) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;

        file.write_all(JOURNAL_MAGIC)?;
        file.write_all(&[JOURNAL_VERSION])?;
        Self::write_entry(&mut file, STATUS_PENDING, snapshot_id, log_size)?;
        file.sync_all()?;
        Ok(())
    }

    /// Mark the in-flight write as committed.
    pub fn commit(&self, snapshot_id: i64) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        Self::write_entry(&mut file, STATUS_COMMITTED, snapshot_id, 0)?;
        file.sync_all()?;
        Ok(())
    }

    /// Discard the journal contents (after rollback).
    pub fn clear(&self) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.sync_all()?;
        Ok(())
    }

    fn write_entry(file: &mut File, status: u8, snapshot_id: i64, log_size: u64) -> Result<()> {
        let mut entry = [0u8; ENTRY_SIZE - 4];
        entry[0] = status;
        entry[1..9].copy_from_slice(&snapshot_id.to_le_bytes());
        entry[9..17].copy_from_slice(&log_size.to_le_bytes());

        file.write_all(&entry)?;
        file.write_all(&crc32fast::hash(&entry).to_le_bytes())?;
        Ok(())
    }

    /// Read one entry, returning None on a short or corrupt read.
    fn read_entry(file: &mut File) -> Option<(u8, i64, u64)> {
        let mut buf = [0u8; ENTRY_SIZE];
        file.read_exact(&mut buf).ok()?;

        let body = &buf[..ENTRY_SIZE - 4];
        let stored = u32::from_le_bytes(buf[ENTRY_SIZE - 4..].try_into().ok()?);
        if stored != crc32fast::hash(body) {
            return None;
        }

        let status = body[0];
        let id = i64::from_le_bytes(body[1..9].try_into().ok()?);
        let log_size = u64::from_le_bytes(body[9..17].try_into().ok()?);
        Some((status, id, log_size))
    }
}
