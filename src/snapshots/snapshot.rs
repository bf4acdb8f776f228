//! Snapshot façade: immutable view over one recorded state.

use crate::database::DatabaseInner;
use crate::error::{DatabaseError, Result};
use crate::kvstore::KeyValueStore;
use crate::types::{Hash, SnapshotId, SnapshotInfo, Timestamp, UndoEntry};
use crate::undo;
use std::sync::Arc;

/// An immutable snapshot of the database at a point in time.
///
/// Metadata (id, name, parent, timestamp) is held in memory; file
/// contents, the key/value payload, and the undo log are loaded from the
/// store on demand. Cheap to clone.
#[derive(Clone)]
pub struct Snapshot {
    db: Arc<DatabaseInner>,
    info: SnapshotInfo,
}

impl Snapshot {
    pub(crate) fn new(db: Arc<DatabaseInner>, info: SnapshotInfo) -> Self {
        Self { db, info }
    }

    /// Unique id, assigned in creation order.
    pub fn id(&self) -> SnapshotId {
        self.info.id
    }

    /// Human-readable name given at creation.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Whether this snapshot was created by an auto-save.
    pub fn is_auto_save(&self) -> bool {
        self.info.auto_save
    }

    /// When the snapshot was recorded.
    pub fn timestamp(&self) -> Timestamp {
        self.info.timestamp
    }

    /// Parent snapshot id, `None` for a root.
    pub fn parent_id(&self) -> Option<SnapshotId> {
        self.info.parent
    }

    /// Parent snapshot, `None` for a root.
    pub fn parent(&self) -> Option<Snapshot> {
        let info = self.db.snapshot_info(self.info.parent?)?;
        Some(Snapshot::new(Arc::clone(&self.db), info))
    }

    /// Content address of the captured file contents.
    pub fn file_hash(&self) -> Hash {
        self.info.file_hash
    }

    /// The full bytes of the versioned file as captured at snapshot time.
    pub fn file_contents(&self) -> Result<Vec<u8>> {
        self.db
            .contents
            .get(&self.info.file_hash)?
            .ok_or_else(|| {
                DatabaseError::Corruption(format!(
                    "Missing file contents for snapshot {}",
                    self.info.id
                ))
            })
    }

    /// The undo log recorded with this snapshot, in recording order.
    pub fn undo_entries(&self) -> Result<Vec<UndoEntry>> {
        self.undo_entries_with_progress(|_, _| {})
    }

    /// Like [`Snapshot::undo_entries`], reporting `(current, total)` per
    /// decoded entry.
    pub fn undo_entries_with_progress(
        &self,
        progress: impl FnMut(usize, usize),
    ) -> Result<Vec<UndoEntry>> {
        let record = self.db.log.read_at(self.info.offset)?;
        undo::decode_entries_with_progress(&record.undo_data, progress)
    }

    /// The key/value payload recorded with this snapshot.
    ///
    /// The returned store is read-only: mutating a recorded state is
    /// rejected with [`DatabaseError::ReadOnly`].
    pub fn read_data(&self) -> Result<KeyValueStore> {
        self.read_data_with_progress(|_, _| {})
    }

    /// Like [`Snapshot::read_data`], reporting `(current, total)` per
    /// decoded entry.
    pub fn read_data_with_progress(
        &self,
        progress: impl FnMut(usize, usize),
    ) -> Result<KeyValueStore> {
        let record = self.db.log.read_at(self.info.offset)?;
        let mut store = KeyValueStore::deserialize_with_progress(&record.kv_data, progress)?;
        store.make_read_only();
        Ok(store)
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("auto_save", &self.info.auto_save)
            .field("parent", &self.info.parent)
            .finish()
    }
}
