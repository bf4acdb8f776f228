//! Main Database struct tying all components together.

use crate::contents::ContentStore;
use crate::error::{DatabaseError, Result};
use crate::file::{FileRef, FileSource};
use crate::globals::GlobalStore;
use crate::journal::Journal;
use crate::kvstore::KeyValueStore;
use crate::snapshots::{Snapshot, SnapshotIndex, SnapshotLog, SnapshotRecord};
use crate::types::{DatabaseStats, SnapshotId, SnapshotInfo, Timestamp, UndoEntry};
use crate::undo;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Magic bytes for the database manifest.
const DB_MAGIC: &[u8; 4] = b"SDB\0";

/// Current database format version.
const DB_VERSION: u8 = 1;

/// Database configuration.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Base path for the database directory.
    pub path: PathBuf,

    /// The document this database versions.
    pub file: FileRef,

    /// File-contents cache size (number of entries).
    pub content_cache_size: usize,

    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./database"),
            file: FileRef::new("untitled"),
            content_cache_size: 64,
            create_if_missing: true,
        }
    }
}

/// Shared database internals.
///
/// Snapshot façades hold an `Arc` to this, so they stay usable after the
/// `Database` handle itself is dropped.
pub(crate) struct DatabaseInner {
    config: DatabaseConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Append-only snapshot log.
    pub(crate) log: SnapshotLog,

    /// Content-addressed file contents.
    pub(crate) contents: ContentStore,

    /// Snapshot index.
    pub(crate) index: RwLock<SnapshotIndex>,

    /// Where the index persists.
    index_path: PathBuf,

    /// Un-versioned global namespace.
    globals: GlobalStore,

    /// Journal for atomic snapshot writes.
    journal: Journal,

    /// Serializes all mutating operations.
    write_lock: Mutex<()>,
}

impl DatabaseInner {
    pub(crate) fn snapshot_info(&self, id: SnapshotId) -> Option<SnapshotInfo> {
        self.index.read().get(id).cloned()
    }
}

/// The root object owning the snapshot tree and the global namespace.
///
/// Snapshots accumulate append-only for the database's lifetime; the
/// single mutation point for the tree is [`Database::write_snapshot_data`].
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Open an existing database or create a new one.
    pub fn open_or_create(config: DatabaseConfig) -> Result<Self> {
        if config.path.exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(DatabaseError::NotInitialized)
        }
    }

    /// Create a new database.
    pub fn create(config: DatabaseConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;

        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let log = SnapshotLog::open(config.path.join("snapshots.log"))?;
        let contents = ContentStore::new(config.path.join("contents"), config.content_cache_size)?;
        let journal = Journal::open(config.path.join("journal.bin"));
        let globals = GlobalStore::new(config.path.join("globals.bin"));

        let index_path = config.path.join("snapshots.idx");
        let index = SnapshotIndex::default();
        index.save(&index_path)?;

        info!(path = %config.path.display(), "created database");

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                config,
                _lock_file: lock_file,
                log,
                contents,
                index: RwLock::new(index),
                index_path,
                globals,
                journal,
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Open an existing database, rolling back any snapshot write that
    /// did not complete.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let log = SnapshotLog::open(config.path.join("snapshots.log"))?;
        let contents = ContentStore::new(config.path.join("contents"), config.content_cache_size)?;
        let journal = Journal::open(config.path.join("journal.bin"));

        let index_path = config.path.join("snapshots.idx");
        let mut index = if index_path.exists() {
            SnapshotIndex::load(&index_path)?
        } else {
            SnapshotIndex::default()
        };

        if let Some(pending) = journal.pending()? {
            warn!(
                snapshot_id = pending.snapshot_id,
                "rolling back uncommitted snapshot write"
            );
            log.truncate(pending.log_size)?;
            index.prune_beyond(pending.log_size);
            index.save(&index_path)?;
            journal.clear()?;
        }

        let globals = GlobalStore::load(config.path.join("globals.bin"))?;

        info!(
            path = %config.path.display(),
            snapshots = index.len(),
            "opened database"
        );

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                config,
                _lock_file: lock_file,
                log,
                contents,
                index: RwLock::new(index),
                index_path,
                globals,
                journal,
                write_lock: Mutex::new(()),
            }),
        })
    }

    // --- Snapshot Operations ---

    /// Get a snapshot by id. Absence is a miss, not an error.
    pub fn snapshot(&self, id: SnapshotId) -> Option<Snapshot> {
        let info = self.inner.index.read().get(id).cloned()?;
        Some(Snapshot::new(Arc::clone(&self.inner), info))
    }

    /// Get the current snapshot.
    ///
    /// `None` until [`Database::set_current_snapshot`] is called; stable
    /// across reads and reopen.
    pub fn current_snapshot(&self) -> Option<Snapshot> {
        let current = self.inner.index.read().current?;
        self.snapshot(current)
    }

    /// Set (or clear) the current snapshot.
    pub fn set_current_snapshot(&self, id: Option<SnapshotId>) -> Result<()> {
        let _guard = self.inner.write_lock.lock();

        let mut index = self.inner.index.write();
        if let Some(id) = id {
            if !index.contains(id) {
                return Err(DatabaseError::SnapshotNotFound(id));
            }
        }
        index.current = id;
        index.save(&self.inner.index_path)
    }

    /// Append a new snapshot capturing the source's current contents and
    /// the given key/value payload.
    ///
    /// `parent` must name an existing snapshot, or be `None` to create a
    /// new root. Returns the id assigned to the new snapshot.
    ///
    /// The write is atomic: either the full snapshot (metadata, file
    /// contents, payload, undo log) is durably recorded, or none of it
    /// is. A failure leaves the tree, the current snapshot, and the next
    /// id untouched.
    pub fn write_snapshot_data(
        &self,
        parent: Option<SnapshotId>,
        source: &(impl FileSource + ?Sized),
        name: &str,
        data: &KeyValueStore,
        undo_entries: &[UndoEntry],
        auto_save: bool,
    ) -> Result<SnapshotId> {
        self.write_snapshot_data_with_progress(
            parent,
            source,
            name,
            data,
            undo_entries,
            auto_save,
            |_, _| {},
        )
    }

    /// Like [`Database::write_snapshot_data`], reporting coarse progress
    /// as `(current, total)` after each durable phase.
    #[allow(clippy::too_many_arguments)]
    pub fn write_snapshot_data_with_progress(
        &self,
        parent: Option<SnapshotId>,
        source: &(impl FileSource + ?Sized),
        name: &str,
        data: &KeyValueStore,
        undo_entries: &[UndoEntry],
        auto_save: bool,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<SnapshotId> {
        let inner = &self.inner;
        let _guard = inner.write_lock.lock();

        if let Some(parent_id) = parent {
            if !inner.index.read().contains(parent_id) {
                return Err(DatabaseError::SnapshotNotFound(parent_id));
            }
        }

        // Everything fallible that doesn't touch the store happens
        // before the journal entry.
        let contents_bytes = source.current_contents()?;
        let kv_data = data.serialize();
        let undo_data = undo::encode_entries(undo_entries)?;

        let id = inner.index.read().next_id;
        let log_size = inner.log.size();

        inner.journal.begin(id, log_size)?;

        let written: Result<SnapshotInfo> = (|| {
            let file_hash = inner.contents.store(&contents_bytes)?;
            progress(1, 3);

            let timestamp = Timestamp::now();
            let record = SnapshotRecord {
                id: SnapshotId(id),
                name: name.to_string(),
                auto_save,
                parent,
                timestamp,
                file_hash,
                kv_data,
                undo_data,
            };

            let offset = inner.log.append(&record)?;
            inner.log.sync()?;
            progress(2, 3);

            Ok(SnapshotInfo {
                id: SnapshotId(id),
                name: name.to_string(),
                auto_save,
                parent,
                timestamp,
                file_hash,
                offset,
            })
        })();

        let snapshot_info = match written {
            Ok(snapshot_info) => snapshot_info,
            Err(e) => {
                self.rollback(log_size);
                return Err(e);
            }
        };

        {
            let mut index = inner.index.write();
            index.snapshots.insert(id, snapshot_info);
            index.next_id = id + 1;
            let saved = index.save(&inner.index_path);
            drop(index);
            if let Err(e) = saved {
                self.rollback(log_size);
                return Err(e);
            }
        }

        if let Err(e) = inner.journal.commit(id) {
            self.rollback(log_size);
            return Err(e);
        }
        progress(3, 3);

        debug!(snapshot_id = id, name, auto_save, "wrote snapshot");
        Ok(SnapshotId(id))
    }

    /// Undo a partially applied snapshot write. Best effort: the journal
    /// still records the pending write, so open-time recovery repeats
    /// the rollback if this one is interrupted.
    fn rollback(&self, log_size: u64) {
        let inner = &self.inner;
        let _ = inner.log.truncate(log_size);

        let mut index = inner.index.write();
        index.prune_beyond(log_size);
        let _ = index.save(&inner.index_path);
        drop(index);

        let _ = inner.journal.clear();
    }

    /// All snapshot metadata, ordered by id.
    pub fn list_snapshots(&self) -> Vec<SnapshotInfo> {
        self.inner.index.read().snapshots.values().cloned().collect()
    }

    /// Number of snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.inner.index.read().len()
    }

    // --- Global Namespace ---

    /// Read a global as a structured JSON value.
    pub fn read_global(&self, key: &str) -> Result<serde_json::Value> {
        self.inner.globals.read(key)
    }

    /// Write a global structured value.
    pub fn write_global(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let _guard = self.inner.write_lock.lock();
        self.inner.globals.write(key, value)
    }

    /// Read the raw bytes of a global.
    pub fn read_global_data(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.globals.read_data(key)
    }

    /// Write a global raw buffer.
    pub fn write_global_data(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let _guard = self.inner.write_lock.lock();
        self.inner.globals.write_data(key, bytes)
    }

    // --- Database Operations ---

    /// The document this database is associated with.
    pub fn file(&self) -> &FileRef {
        &self.inner.config.file
    }

    /// The database directory.
    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    /// Database statistics.
    pub fn stats(&self) -> Result<DatabaseStats> {
        Ok(DatabaseStats {
            snapshot_count: self.snapshot_count() as u64,
            global_count: self.inner.globals.count() as u64,
            log_size_bytes: self.inner.log.size(),
            blob_size_bytes: self.inner.contents.total_size()?,
        })
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.log.sync()?;
        self.inner.index.read().save(&self.inner.index_path)?;
        self.inner.globals.save()?;
        Ok(())
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(DB_MAGIC)?;
        file.write_all(&[DB_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != DB_MAGIC {
            return Err(DatabaseError::InvalidFormat("Invalid database magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != DB_VERSION {
            return Err(DatabaseError::InvalidFormat(format!(
                "Unsupported database version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| DatabaseError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> DatabaseConfig {
        DatabaseConfig {
            path: dir.path().join("db"),
            file: FileRef::new("test.bin"),
            content_cache_size: 16,
            create_if_missing: true,
        }
    }

    struct FailingSource;

    impl FileSource for FailingSource {
        fn current_contents(&self) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::Other, "unreadable"))
        }
    }

    #[test]
    fn test_create_database() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        assert!(db.path().join("MANIFEST").exists());
        assert!(db.path().join("snapshots.log").exists());
        assert_eq!(db.snapshot_count(), 0);
        assert_eq!(db.file().name(), "test.bin");
    }

    #[test]
    fn test_write_root_snapshot() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        let mut data = KeyValueStore::new();
        data.set_value("a", &json!(1)).unwrap();

        let id = db
            .write_snapshot_data(None, &b"contents"[..], "initial", &data, &[], false)
            .unwrap();

        assert_eq!(id, SnapshotId(0));

        let snapshot = db.snapshot(id).unwrap();
        assert_eq!(snapshot.name(), "initial");
        assert!(!snapshot.is_auto_save());
        assert!(snapshot.parent().is_none());
        assert_eq!(snapshot.file_contents().unwrap(), b"contents");

        let payload = snapshot.read_data().unwrap();
        assert_eq!(payload.get_value("a").unwrap(), json!(1));
    }

    #[test]
    fn test_snapshot_parent_chain() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        let mut data = KeyValueStore::new();
        data.set_value("a", &json!(1)).unwrap();
        let s1 = db
            .write_snapshot_data(None, &b"v1"[..], "initial", &data, &[], false)
            .unwrap();

        data.set_value("a", &json!(2)).unwrap();
        let s2 = db
            .write_snapshot_data(Some(s1), &b"v2"[..], "second", &data, &[], false)
            .unwrap();

        assert_eq!(s1, SnapshotId(0));
        assert_eq!(s2, SnapshotId(1));

        let parent = db.snapshot(s2).unwrap().parent().unwrap();
        assert_eq!(parent.id(), s1);
        assert!(parent.parent().is_none());
    }

    #[test]
    fn test_unknown_parent_fails() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        let result = db.write_snapshot_data(
            Some(SnapshotId(99)),
            &b"contents"[..],
            "orphan",
            &KeyValueStore::new(),
            &[],
            false,
        );

        assert!(matches!(result, Err(DatabaseError::SnapshotNotFound(_))));
        assert_eq!(db.snapshot_count(), 0);
    }

    #[test]
    fn test_unknown_snapshot_is_miss_not_error() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();
        assert!(db.snapshot(SnapshotId(42)).is_none());
    }

    #[test]
    fn test_failed_write_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        let s0 = db
            .write_snapshot_data(None, &b"ok"[..], "base", &KeyValueStore::new(), &[], false)
            .unwrap();
        db.set_current_snapshot(Some(s0)).unwrap();
        let log_size = db.inner.log.size();

        let result = db.write_snapshot_data(
            Some(s0),
            &FailingSource,
            "doomed",
            &KeyValueStore::new(),
            &[],
            false,
        );
        assert!(result.is_err());

        assert!(db.snapshot(SnapshotId(1)).is_none());
        assert_eq!(db.current_snapshot().unwrap().id(), s0);
        assert_eq!(db.inner.log.size(), log_size);

        // Next id is not burned by the failure.
        let s1 = db
            .write_snapshot_data(Some(s0), &b"ok2"[..], "next", &KeyValueStore::new(), &[], false)
            .unwrap();
        assert_eq!(s1, SnapshotId(1));
    }

    #[test]
    fn test_oversized_name_fails_without_trace() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        let name = "n".repeat(70_000);
        let result =
            db.write_snapshot_data(None, &b"c"[..], &name, &KeyValueStore::new(), &[], false);
        assert!(matches!(result, Err(DatabaseError::InvalidFormat(_))));

        assert_eq!(db.snapshot_count(), 0);
        assert_eq!(db.inner.log.size(), 0);

        let id = db
            .write_snapshot_data(None, &b"c"[..], "ok", &KeyValueStore::new(), &[], false)
            .unwrap();
        assert_eq!(id, SnapshotId(0));
    }

    #[test]
    fn test_current_snapshot() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        assert!(db.current_snapshot().is_none());

        let id = db
            .write_snapshot_data(None, &b"c"[..], "s", &KeyValueStore::new(), &[], false)
            .unwrap();

        // Writing does not change the current snapshot.
        assert!(db.current_snapshot().is_none());

        db.set_current_snapshot(Some(id)).unwrap();
        assert_eq!(db.current_snapshot().unwrap().id(), id);

        db.set_current_snapshot(None).unwrap();
        assert!(db.current_snapshot().is_none());

        assert!(matches!(
            db.set_current_snapshot(Some(SnapshotId(9))),
            Err(DatabaseError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn test_globals() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        db.write_global("build", &json!({"version": "1.0"})).unwrap();
        assert_eq!(db.read_global("build").unwrap(), json!({"version": "1.0"}));

        assert!(matches!(
            db.read_global("missing"),
            Err(DatabaseError::KeyNotFound(_))
        ));

        db.write_global_data("raw", vec![1, 2, 3]).unwrap();
        assert_eq!(db.read_global_data("raw").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_globals_independent_of_snapshots() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        db.write_global("setting", &json!("stable")).unwrap();

        let mut data = KeyValueStore::new();
        data.set_value("setting", &json!("versioned")).unwrap();
        let id = db
            .write_snapshot_data(None, &b"c"[..], "s", &data, &[], false)
            .unwrap();

        assert_eq!(db.read_global("setting").unwrap(), json!("stable"));

        db.write_global("setting", &json!("changed")).unwrap();
        let payload = db.snapshot(id).unwrap().read_data().unwrap();
        assert_eq!(payload.get_value("setting").unwrap(), json!("versioned"));
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        {
            let db = Database::create(config.clone()).unwrap();

            let mut data = KeyValueStore::new();
            data.set_value("k", &json!("v")).unwrap();
            let s0 = db
                .write_snapshot_data(None, &b"c"[..], "first", &data, &[], true)
                .unwrap();
            db.set_current_snapshot(Some(s0)).unwrap();
            db.write_global("g", &json!(7)).unwrap();
        }

        {
            let db = Database::open(config).unwrap();

            assert_eq!(db.snapshot_count(), 1);
            let snapshot = db.current_snapshot().unwrap();
            assert_eq!(snapshot.name(), "first");
            assert!(snapshot.is_auto_save());
            assert_eq!(snapshot.file_contents().unwrap(), b"c");
            assert_eq!(db.read_global("g").unwrap(), json!(7));
        }
    }

    #[test]
    fn test_database_lock() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let _db1 = Database::create(config.clone()).unwrap();

        let result = Database::open(config);
        assert!(matches!(result, Err(DatabaseError::Locked)));
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            create_if_missing: false,
            ..test_config(&dir)
        };

        let result = Database::open_or_create(config);
        assert!(matches!(result, Err(DatabaseError::NotInitialized)));
    }

    #[test]
    fn test_write_progress_monotonic() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        let mut calls = Vec::new();
        db.write_snapshot_data_with_progress(
            None,
            &b"c"[..],
            "s",
            &KeyValueStore::new(),
            &[],
            false,
            |current, total| calls.push((current, total)),
        )
        .unwrap();

        assert_eq!(calls, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        db.write_snapshot_data(None, &b"c"[..], "s", &KeyValueStore::new(), &[], false)
            .unwrap();
        db.write_global("g", &json!(1)).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.snapshot_count, 1);
        assert_eq!(stats.global_count, 1);
        assert!(stats.log_size_bytes > 0);
        assert!(stats.blob_size_bytes > 0);
    }

    #[test]
    fn test_snapshot_outlives_database_handle() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(test_config(&dir)).unwrap();

        let mut data = KeyValueStore::new();
        data.set_value("k", &json!(1)).unwrap();
        let id = db
            .write_snapshot_data(None, &b"c"[..], "s", &data, &[], false)
            .unwrap();

        let snapshot = db.snapshot(id).unwrap();
        drop(db);

        // The façade keeps the internals alive.
        assert_eq!(snapshot.file_contents().unwrap(), b"c");
        assert_eq!(snapshot.read_data().unwrap().get_value("k").unwrap(), json!(1));
    }
}
