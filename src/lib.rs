//! # snapdb
//!
//! A snapshot-versioned key/value database with parent-linked history
//! and undo logs.
//!
//! ## Core Concepts
//!
//! - **Snapshots**: Immutable, content-addressed states forming a tree
//!   via parent links
//! - **Key/Value payloads**: Ordered, namespaced stores of JSON values
//!   and raw buffers with deterministic serialization
//! - **Undo logs**: Per-snapshot, attributed action logs in recording
//!   order
//! - **Globals**: Un-versioned values that live outside the tree
//!
//! ## Example
//!
//! ```ignore
//! use snapdb::{Database, DatabaseConfig, KeyValueStore};
//! use serde_json::json;
//!
//! let db = Database::open_or_create(DatabaseConfig {
//!     path: "./my-database".into(),
//!     ..Default::default()
//! })?;
//!
//! // Record a snapshot of the document plus analysis state
//! let mut data = KeyValueStore::new();
//! data.set_value("analysis/functions", &json!(["main", "init"]))?;
//! let id = db.write_snapshot_data(None, &contents[..], "initial", &data, &[], false)?;
//!
//! // Read it back later
//! let snapshot = db.snapshot(id).unwrap();
//! let payload = snapshot.read_data()?;
//! ```

pub mod contents;
pub mod database;
pub mod error;
pub mod file;
pub mod globals;
pub mod journal;
pub mod kvstore;
pub mod snapshots;
pub mod types;
pub mod undo;

// Re-exports
pub use contents::ContentStore;
pub use database::{Database, DatabaseConfig};
pub use error::{DatabaseError, Result};
pub use file::{FileRef, FileSource};
pub use kvstore::{KeyValueStore, KvValue, NamespaceGuard};
pub use snapshots::Snapshot;
pub use types::*;
