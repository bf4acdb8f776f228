//! Content-addressed storage for snapshot file contents.
//!
//! Each snapshot captures the full bytes of the versioned file. Contents
//! are stored once per unique byte sequence, keyed by SHA-256 and sharded
//! by the first hash byte, so identical file states across snapshots
//! share storage.

use crate::error::{DatabaseError, Result};
use crate::types::Hash;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Magic bytes for content files.
const CONTENT_MAGIC: &[u8; 4] = b"CNT\0";

/// Current content format version.
const CONTENT_VERSION: u8 = 1;

/// Content-addressed file-contents store.
pub struct ContentStore {
    /// Base directory for content files.
    path: PathBuf,

    /// LRU cache for recently read contents.
    cache: Mutex<LruCache<Hash, Vec<u8>>>,
}

impl ContentStore {
    /// Create a content store at the given directory.
    pub fn new(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap();

        Ok(Self {
            path,
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Store contents, returning their hash.
    ///
    /// If the same bytes are already stored, this is a no-op.
    pub fn store(&self, content: &[u8]) -> Result<Hash> {
        let hash = Hash::from_bytes(content);

        if self.exists(&hash) {
            return Ok(hash);
        }

        let shard_dir = self.shard_path(&hash);
        fs::create_dir_all(&shard_dir)?;

        let content_path = self.content_path(&hash);
        let mut file = File::create(&content_path)?;

        file.write_all(CONTENT_MAGIC)?;
        file.write_all(&[CONTENT_VERSION])?;

        file.write_all(&(content.len() as u64).to_le_bytes())?;
        file.write_all(content)?;

        let checksum = crc32fast::hash(content);
        file.write_all(&checksum.to_le_bytes())?;

        file.sync_all()?;

        self.cache.lock().put(hash, content.to_vec());

        Ok(hash)
    }

    /// Get contents by hash.
    pub fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        if let Some(cached) = self.cache.lock().get(hash).cloned() {
            return Ok(Some(cached));
        }

        let content_path = self.content_path(hash);
        if !content_path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&content_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != CONTENT_MAGIC {
            return Err(DatabaseError::InvalidFormat("Invalid content magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != CONTENT_VERSION {
            return Err(DatabaseError::InvalidFormat(format!(
                "Unsupported content version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut content = vec![0u8; len];
        file.read_exact(&mut content)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&content);

        if stored_checksum != computed_checksum {
            return Err(DatabaseError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let computed_hash = Hash::from_bytes(&content);
        if &computed_hash != hash {
            return Err(DatabaseError::HashMismatch {
                expected: *hash,
                got: computed_hash,
            });
        }

        self.cache.lock().put(*hash, content.clone());

        Ok(Some(content))
    }

    /// Check if contents exist for a hash.
    pub fn exists(&self, hash: &Hash) -> bool {
        if self.cache.lock().contains(hash) {
            return true;
        }
        self.content_path(hash).exists()
    }

    /// Total size of all stored contents on disk.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                for content_entry in fs::read_dir(entry.path())? {
                    total += content_entry?.metadata()?.len();
                }
            }
        }

        Ok(total)
    }

    fn shard_path(&self, hash: &Hash) -> PathBuf {
        self.path.join(hash.shard_prefix())
    }

    fn content_path(&self, hash: &Hash) -> PathBuf {
        self.shard_path(hash).join(hash.to_hex())
    }
}
