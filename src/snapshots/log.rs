//! Append-only snapshot log.

use crate::error::{DatabaseError, Result};
use crate::types::{Hash, SnapshotId, Timestamp};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for snapshot records.
const SNAPSHOT_MAGIC: &[u8; 4] = b"SNP\0";

/// Current snapshot record format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Sentinel for "no parent" in the parent field.
const NO_PARENT: i64 = -1;

/// A full snapshot record as stored in the log.
#[derive(Clone, Debug)]
pub struct SnapshotRecord {
    pub id: SnapshotId,
    pub name: String,
    pub auto_save: bool,
    pub parent: Option<SnapshotId>,
    pub timestamp: Timestamp,

    /// Content address of the captured file contents.
    pub file_hash: Hash,

    /// Serialized key/value payload.
    pub kv_data: Vec<u8>,

    /// Encoded undo log.
    pub undo_data: Vec<u8>,
}

/// Append-only log of snapshot records.
pub struct SnapshotLog {
    /// Log file handle.
    file: RwLock<File>,

    /// Current file size (for appending).
    file_size: RwLock<u64>,
}

impl SnapshotLog {
    /// Open or create a snapshot log.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();

        Ok(Self {
            file: RwLock::new(file),
            file_size: RwLock::new(file_size),
        })
    }

    /// Append a record, returning the offset where it was written.
    ///
    /// The caller is responsible for syncing (snapshot writes sync once
    /// per record, under the journal).
    pub fn append(&self, record: &SnapshotRecord) -> Result<u64> {
        // Field lengths must fit the record framing before anything
        // touches the file; a wrapped length would commit a record the
        // reader cannot walk.
        if record.name.len() > u16::MAX as usize {
            return Err(DatabaseError::InvalidFormat(format!(
                "Snapshot name length {} exceeds maximum {}",
                record.name.len(),
                u16::MAX
            )));
        }
        if record.kv_data.len() > u32::MAX as usize || record.undo_data.len() > u32::MAX as usize {
            return Err(DatabaseError::InvalidFormat(
                "Snapshot payload exceeds maximum record size".into(),
            ));
        }

        let mut file = self.file.write();

        let offset = *self.file_size.read();
        file.seek(SeekFrom::Start(offset))?;

        file.write_all(SNAPSHOT_MAGIC)?;
        file.write_all(&[SNAPSHOT_VERSION])?;
        file.write_all(&[0u8])?; // flags, reserved

        file.write_all(&record.id.0.to_le_bytes())?;
        file.write_all(&record.parent.map_or(NO_PARENT, |p| p.0).to_le_bytes())?;
        file.write_all(&[record.auto_save as u8])?;
        file.write_all(&record.timestamp.0.to_le_bytes())?;

        let name_bytes = record.name.as_bytes();
        file.write_all(&(name_bytes.len() as u16).to_le_bytes())?;
        file.write_all(name_bytes)?;

        file.write_all(&record.file_hash.0)?;

        file.write_all(&(record.kv_data.len() as u32).to_le_bytes())?;
        file.write_all(&record.kv_data)?;

        file.write_all(&(record.undo_data.len() as u32).to_le_bytes())?;
        file.write_all(&record.undo_data)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&record.kv_data);
        hasher.update(&record.undo_data);
        file.write_all(&hasher.finalize().to_le_bytes())?;

        let new_size = file.stream_position()?;
        *self.file_size.write() = new_size;

        Ok(offset)
    }

    /// Read the record at a given offset.
    pub fn read_at(&self, offset: u64) -> Result<SnapshotRecord> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        Self::read_record(&mut file)
    }

    /// Sync pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    /// Truncate the log back to a previous length (journal rollback).
    pub fn truncate(&self, len: u64) -> Result<()> {
        let file = self.file.write();
        file.set_len(len)?;
        file.sync_all()?;
        *self.file_size.write() = len;
        Ok(())
    }

    /// Current log size in bytes.
    pub fn size(&self) -> u64 {
        *self.file_size.read()
    }

    fn read_record(file: &mut File) -> Result<SnapshotRecord> {
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(DatabaseError::InvalidFormat("Invalid snapshot magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(DatabaseError::InvalidFormat(format!(
                "Unsupported snapshot version: {}",
                version[0]
            )));
        }

        let mut _flags = [0u8; 1];
        file.read_exact(&mut _flags)?;

        let mut id_bytes = [0u8; 8];
        file.read_exact(&mut id_bytes)?;
        let id = SnapshotId(i64::from_le_bytes(id_bytes));

        let mut parent_bytes = [0u8; 8];
        file.read_exact(&mut parent_bytes)?;
        let parent_raw = i64::from_le_bytes(parent_bytes);
        let parent = (parent_raw != NO_PARENT).then_some(SnapshotId(parent_raw));

        let mut auto_save = [0u8; 1];
        file.read_exact(&mut auto_save)?;

        let mut ts_bytes = [0u8; 8];
        file.read_exact(&mut ts_bytes)?;
        let timestamp = Timestamp(i64::from_le_bytes(ts_bytes));

        let mut name_len_bytes = [0u8; 2];
        file.read_exact(&mut name_len_bytes)?;
        let name_len = u16::from_le_bytes(name_len_bytes) as usize;
        let mut name_bytes = vec![0u8; name_len];
        file.read_exact(&mut name_bytes)?;
        let name = String::from_utf8_lossy(&name_bytes).into_owned();

        let mut hash_bytes = [0u8; 32];
        file.read_exact(&mut hash_bytes)?;
        let file_hash = Hash(hash_bytes);

        let mut kv_len_bytes = [0u8; 4];
        file.read_exact(&mut kv_len_bytes)?;
        let kv_len = u32::from_le_bytes(kv_len_bytes) as usize;
        let mut kv_data = vec![0u8; kv_len];
        file.read_exact(&mut kv_data)?;

        let mut undo_len_bytes = [0u8; 4];
        file.read_exact(&mut undo_len_bytes)?;
        let undo_len = u32::from_le_bytes(undo_len_bytes) as usize;
        let mut undo_data = vec![0u8; undo_len];
        file.read_exact(&mut undo_data)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&kv_data);
        hasher.update(&undo_data);
        let computed_checksum = hasher.finalize();

        if stored_checksum != computed_checksum {
            return Err(DatabaseError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        Ok(SnapshotRecord {
            id,
            name,
            auto_save: auto_save[0] != 0,
            parent,
            timestamp,
            file_hash,
            kv_data,
            undo_data,
        })
    }
}
