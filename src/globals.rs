//! Un-versioned global key/value namespace.
//!
//! Globals live outside the snapshot tree: they are mutated in place,
//! carry no history, and persist independently of any snapshot payload.

use crate::error::{DatabaseError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the globals file.
const GLOBALS_MAGIC: &[u8; 4] = b"GLB\0";

/// Current globals format version.
const GLOBALS_VERSION: u8 = 1;

/// A global value: canonical compact JSON bytes or an opaque buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum GlobalValue {
    Json(Vec<u8>),
    Data(Vec<u8>),
}

impl GlobalValue {
    fn bytes(&self) -> &[u8] {
        match self {
            GlobalValue::Json(b) | GlobalValue::Data(b) => b,
        }
    }
}

/// The global namespace of a database.
///
/// Every write persists the full mapping immediately; the mapping is
/// expected to stay small (build metadata, UI state, and the like).
pub struct GlobalStore {
    path: PathBuf,
    map: RwLock<HashMap<String, GlobalValue>>,
}

impl GlobalStore {
    /// Create an empty global store.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Load a global store, starting empty if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self::new(path);
        if store.path.exists() {
            store.load_from_file()?;
        }
        Ok(store)
    }

    /// Read a global as a structured JSON value.
    pub fn read(&self, key: &str) -> Result<serde_json::Value> {
        let map = self.map.read();
        let value = map
            .get(key)
            .ok_or_else(|| DatabaseError::KeyNotFound(key.to_string()))?;
        serde_json::from_slice(value.bytes()).map_err(|e| DatabaseError::Parse(e.to_string()))
    }

    /// Write a global structured value, persisting immediately.
    pub fn write(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.map
            .write()
            .insert(key.to_string(), GlobalValue::Json(bytes));
        self.save()
    }

    /// Read the raw bytes of a global.
    pub fn read_data(&self, key: &str) -> Result<Vec<u8>> {
        self.map
            .read()
            .get(key)
            .map(|v| v.bytes().to_vec())
            .ok_or_else(|| DatabaseError::KeyNotFound(key.to_string()))
    }

    /// Write a global raw buffer, persisting immediately.
    pub fn write_data(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.map
            .write()
            .insert(key.to_string(), GlobalValue::Data(bytes));
        self.save()
    }

    /// Number of globals.
    pub fn count(&self) -> usize {
        self.map.read().len()
    }

    /// Persist the mapping to disk.
    pub fn save(&self) -> Result<()> {
        let result: Result<()> = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)?;

            file.write_all(GLOBALS_MAGIC)?;
            file.write_all(&[GLOBALS_VERSION])?;

            let map = self.map.read();
            let encoded = rmp_serde::to_vec(&*map)
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            file.write_all(&(encoded.len() as u64).to_le_bytes())?;
            file.write_all(&encoded)?;

            file.sync_all()?;
            Ok(())
        })();

        // A rejected persist surfaces as a write failure, not a bare IO
        // error, since the in-memory mapping may now be ahead of disk.
        result.map_err(|e| DatabaseError::Write(e.to_string()))
    }

    fn load_from_file(&self) -> Result<()> {
        let mut file = File::open(&self.path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != GLOBALS_MAGIC {
            return Err(DatabaseError::InvalidFormat("Invalid globals magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != GLOBALS_VERSION {
            return Err(DatabaseError::InvalidFormat(format!(
                "Unsupported globals version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;

        let map: HashMap<String, GlobalValue> =
            rmp_serde::from_slice(&encoded).map_err(|e| DatabaseError::Parse(e.to_string()))?;
        *self.map.write() = map;

        Ok(())
    }
}
