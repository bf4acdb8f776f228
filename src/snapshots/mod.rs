//! Snapshot storage and façade objects.
//!
//! Snapshots live in an append-only log of framed records, with a
//! separate index mapping ids to log offsets. `Snapshot` is a cheap
//! handle over the shared database internals.

mod index;
mod log;
mod snapshot;

pub use index::SnapshotIndex;
pub use log::{SnapshotLog, SnapshotRecord};
pub use snapshot::Snapshot;
