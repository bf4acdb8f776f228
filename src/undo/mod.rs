//! Undo log encoding.
//!
//! Each snapshot carries an ordered log of undo entries. The log is
//! stored as length-prefixed MessagePack entries so retrieval can decode
//! incrementally and report progress, which matters when the log is
//! large.

use crate::error::{DatabaseError, Result};
use crate::types::UndoEntry;

/// Encode an ordered sequence of undo entries.
pub fn encode_entries(entries: &[UndoEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    for entry in entries {
        let encoded =
            rmp_serde::to_vec(entry).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        out.extend_from_slice(&encoded);
    }

    Ok(out)
}

/// Decode an undo log.
pub fn decode_entries(data: &[u8]) -> Result<Vec<UndoEntry>> {
    decode_entries_with_progress(data, |_, _| {})
}

/// Decode an undo log, reporting `(current, total)` after each entry.
///
/// A decode failure aborts the scan; no partial results are returned.
pub fn decode_entries_with_progress(
    data: &[u8],
    mut progress: impl FnMut(usize, usize),
) -> Result<Vec<UndoEntry>> {
    if data.len() < 4 {
        return Err(DatabaseError::Corruption("Truncated undo log".into()));
    }

    let count = u32::from_le_bytes(data[0..4].try_into().expect("4 bytes")) as usize;
    let mut pos = 4;

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        if pos + 4 > data.len() {
            return Err(DatabaseError::Corruption("Truncated undo log".into()));
        }
        let len = u32::from_le_bytes(data[pos..pos + 4].try_into().expect("4 bytes")) as usize;
        pos += 4;

        if pos + len > data.len() {
            return Err(DatabaseError::Corruption("Truncated undo log".into()));
        }

        let entry: UndoEntry = rmp_serde::from_slice(&data[pos..pos + len])
            .map_err(|e| DatabaseError::Parse(e.to_string()))?;
        pos += len;

        entries.push(entry);
        progress(i + 1, count);
    }

    Ok(entries)
}
