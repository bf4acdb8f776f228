//! Error types for the database.

use crate::types::{Hash, SnapshotId};
use thiserror::Error;

/// Main error type for database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Write rejected: {0}")]
    Write(String),

    #[error("Store is read-only")]
    ReadOnly,

    #[error("Unbalanced namespace: end_namespace with empty scope stack")]
    UnbalancedNamespace,

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: Hash, got: Hash },

    #[error("Invalid database format: {0}")]
    InvalidFormat(String),

    #[error("Database is locked by another process")]
    Locked,

    #[error("Database not initialized")]
    NotInitialized,
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        DatabaseError::Parse(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for DatabaseError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        DatabaseError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for DatabaseError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        DatabaseError::Parse(e.to_string())
    }
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;
