//! Key/value store implementation.

use crate::error::{DatabaseError, Result};
use crate::kvstore::NamespaceGuard;
use std::collections::BTreeMap;

/// Magic bytes for serialized stores.
const KVS_MAGIC: &[u8; 4] = b"KVS\0";

/// Current serialization format version.
const KVS_VERSION: u8 = 1;

/// Fixed framing: magic + version + entry count.
const KVS_HEADER_SIZE: usize = 4 + 1 + 4;

/// Per-entry framing: key length (u16) + tag (u8) + value length (u32).
const ENTRY_OVERHEAD: usize = 2 + 1 + 4;

/// A stored value: canonical compact JSON bytes or an opaque buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KvValue {
    Json(Vec<u8>),
    Buffer(Vec<u8>),
}

impl KvValue {
    /// Raw bytes of the value, whatever its encoding.
    pub fn bytes(&self) -> &[u8] {
        match self {
            KvValue::Json(b) | KvValue::Buffer(b) => b,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            KvValue::Json(_) => 0,
            KvValue::Buffer(_) => 1,
        }
    }
}

/// Ordered, namespaced mapping from string keys to JSON values or raw
/// byte buffers.
///
/// Keys are stored fully qualified: the active namespace scopes joined
/// with `/` prefix every key passed to an accessor. Writes are
/// last-write-wins. Stores materialized from a snapshot payload are
/// read-only.
#[derive(Clone, Debug, Default)]
pub struct KeyValueStore {
    /// Fully-qualified key to value. BTreeMap keeps keys ordered, which
    /// also makes serialization deterministic.
    entries: BTreeMap<String, KvValue>,

    /// Active namespace scope stack.
    scopes: Vec<String>,

    /// Total value bytes across all entries.
    data_bytes: usize,

    /// Serialized-size estimate (keys + values + per-entry framing).
    storage_bytes: usize,

    /// Whether mutation is rejected.
    read_only: bool,
}

impl KeyValueStore {
    /// Create an empty, writable store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys visible in the active namespace scope, sorted.
    ///
    /// At root scope this is every key in the store; inside a namespace
    /// it is the fully-qualified keys under the current prefix.
    pub fn keys(&self) -> Vec<String> {
        if self.scopes.is_empty() {
            return self.entries.keys().cloned().collect();
        }

        let prefix = format!("{}/", self.scopes.join("/"));
        self.entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Check whether a key is set in the current scope.
    pub fn has_value(&self, key: &str) -> bool {
        self.entries.contains_key(&self.resolve(key))
    }

    /// Get a key as a structured JSON value.
    ///
    /// Fails with `KeyNotFound` if the key is absent, or `Parse` if the
    /// stored bytes are not valid JSON (e.g. the key was written with
    /// `set_buffer`).
    pub fn get_value(&self, key: &str) -> Result<serde_json::Value> {
        let full = self.resolve(key);
        let value = self
            .entries
            .get(&full)
            .ok_or(DatabaseError::KeyNotFound(full))?;
        serde_json::from_slice(value.bytes()).map_err(|e| DatabaseError::Parse(e.to_string()))
    }

    /// Get the raw bytes of a key.
    ///
    /// Fails with `KeyNotFound` if the key is absent.
    pub fn get_buffer(&self, key: &str) -> Result<Vec<u8>> {
        let full = self.resolve(key);
        self.entries
            .get(&full)
            .map(|v| v.bytes().to_vec())
            .ok_or(DatabaseError::KeyNotFound(full))
    }

    /// Set a key to a structured value, stored as canonical compact JSON.
    pub fn set_value(&mut self, key: &str, value: &serde_json::Value) -> Result<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.insert(self.resolve(key), KvValue::Json(bytes))
    }

    /// Set a key to a raw byte buffer.
    pub fn set_buffer(&mut self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.insert(self.resolve(key), KvValue::Buffer(bytes))
    }

    /// Push a namespace scope. All subsequent key accesses are prefixed
    /// with `name` until the matching `end_namespace`.
    pub fn begin_namespace(&mut self, name: &str) {
        self.scopes.push(name.to_string());
    }

    /// Pop the innermost namespace scope.
    pub fn end_namespace(&mut self) -> Result<()> {
        self.scopes
            .pop()
            .map(|_| ())
            .ok_or(DatabaseError::UnbalancedNamespace)
    }

    /// Enter a namespace scope for the lifetime of the returned guard.
    ///
    /// The guard pops the scope on drop, so scoping stays balanced on
    /// every exit path.
    pub fn namespace(&mut self, name: &str) -> NamespaceGuard<'_> {
        NamespaceGuard::enter(self, name)
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    pub fn value_size(&self) -> usize {
        self.entries.len()
    }

    /// Total value bytes across all entries.
    pub fn data_size(&self) -> usize {
        self.data_bytes
    }

    /// Size the store would serialize to, including framing.
    pub fn value_storage_size(&self) -> usize {
        KVS_HEADER_SIZE + self.storage_bytes + 4
    }

    /// Depth of the active namespace scope stack.
    pub fn namespace_size(&self) -> usize {
        self.scopes.len()
    }

    /// Whether mutation is rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Permanently reject further mutation.
    pub fn make_read_only(&mut self) {
        self.read_only = true;
    }

    /// Serialize the entire mapping to a single deterministic byte
    /// sequence.
    ///
    /// Entries are written in key order with a trailing crc32 of the
    /// body, so equal mappings always produce identical bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.value_storage_size());
        out.extend_from_slice(KVS_MAGIC);
        out.push(KVS_VERSION);
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for (key, value) in &self.entries {
            out.extend_from_slice(&(key.len() as u16).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.push(value.tag());
            out.extend_from_slice(&(value.bytes().len() as u32).to_le_bytes());
            out.extend_from_slice(value.bytes());
        }

        let checksum = crc32fast::hash(&out[5..]);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Reconstruct a store from serialized bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Self::deserialize_with_progress(data, |_, _| {})
    }

    /// Reconstruct a store from serialized bytes, reporting per-entry
    /// progress as `(current, total)`.
    pub fn deserialize_with_progress(
        data: &[u8],
        mut progress: impl FnMut(usize, usize),
    ) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let magic = cursor.take(4)?;
        if magic != KVS_MAGIC {
            return Err(DatabaseError::InvalidFormat("Invalid store magic".into()));
        }

        let version = cursor.take(1)?[0];
        if version != KVS_VERSION {
            return Err(DatabaseError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version
            )));
        }

        if data.len() < KVS_HEADER_SIZE + 4 {
            return Err(DatabaseError::Corruption("Truncated store data".into()));
        }

        let body = &data[5..data.len() - 4];
        let stored_checksum =
            u32::from_le_bytes(data[data.len() - 4..].try_into().expect("4 bytes"));
        let computed_checksum = crc32fast::hash(body);
        if stored_checksum != computed_checksum {
            return Err(DatabaseError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let count = u32::from_le_bytes(cursor.take(4)?.try_into().expect("4 bytes")) as usize;

        let mut store = Self::new();
        for i in 0..count {
            let key_len =
                u16::from_le_bytes(cursor.take(2)?.try_into().expect("2 bytes")) as usize;
            let key = String::from_utf8_lossy(cursor.take(key_len)?).into_owned();

            let tag = cursor.take(1)?[0];
            let value_len =
                u32::from_le_bytes(cursor.take(4)?.try_into().expect("4 bytes")) as usize;
            let bytes = cursor.take(value_len)?.to_vec();

            let value = match tag {
                0 => KvValue::Json(bytes),
                1 => KvValue::Buffer(bytes),
                t => {
                    return Err(DatabaseError::Corruption(format!(
                        "Unknown value tag: {}",
                        t
                    )))
                }
            };

            store.insert(key, value)?;
            progress(i + 1, count);
        }

        Ok(store)
    }

    fn resolve(&self, key: &str) -> String {
        if self.scopes.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.scopes.join("/"), key)
        }
    }

    fn insert(&mut self, full_key: String, value: KvValue) -> Result<()> {
        if self.read_only {
            return Err(DatabaseError::ReadOnly);
        }

        // Lengths must fit the serialized framing, or the store would
        // accept an entry its own output cannot decode.
        if full_key.len() > u16::MAX as usize {
            return Err(DatabaseError::Write(format!(
                "Key length {} exceeds maximum {}",
                full_key.len(),
                u16::MAX
            )));
        }
        if value.bytes().len() > u32::MAX as usize {
            return Err(DatabaseError::Write(format!(
                "Value length {} exceeds maximum {}",
                value.bytes().len(),
                u32::MAX
            )));
        }

        let added_data = value.bytes().len();
        let added_storage = ENTRY_OVERHEAD + full_key.len() + added_data;

        if let Some(old) = self.entries.insert(full_key.clone(), value) {
            self.data_bytes -= old.bytes().len();
            self.storage_bytes -= ENTRY_OVERHEAD + full_key.len() + old.bytes().len();
        }

        self.data_bytes += added_data;
        self.storage_bytes += added_storage;
        Ok(())
    }
}

impl PartialEq for KeyValueStore {
    /// Stores compare by mapping only; scope stack and read-only state
    /// are transient.
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for KeyValueStore {}

/// Bounds-checked reader over a byte slice.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(DatabaseError::Corruption("Truncated store data".into()));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get_value() {
        let mut store = KeyValueStore::new();
        store.set_value("config", &json!({"depth": 3})).unwrap();

        assert!(store.has_value("config"));
        assert_eq!(store.get_value("config").unwrap(), json!({"depth": 3}));
    }

    #[test]
    fn test_get_missing_key() {
        let store = KeyValueStore::new();
        assert!(matches!(
            store.get_value("missing"),
            Err(DatabaseError::KeyNotFound(_))
        ));
        assert!(matches!(
            store.get_buffer("missing"),
            Err(DatabaseError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_buffer_is_not_json() {
        let mut store = KeyValueStore::new();
        store.set_buffer("raw", vec![0xde, 0xad, 0xbe, 0xef]).unwrap();

        assert_eq!(store.get_buffer("raw").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(
            store.get_value("raw"),
            Err(DatabaseError::Parse(_))
        ));
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = KeyValueStore::new();
        store.set_value("k", &json!(1)).unwrap();
        store.set_value("k", &json!(2)).unwrap();

        assert_eq!(store.get_value("k").unwrap(), json!(2));
        assert_eq!(store.value_size(), 1);
    }

    #[test]
    fn test_namespace_scoping() {
        let mut store = KeyValueStore::new();
        store.set_value("name", &json!("root")).unwrap();

        store.begin_namespace("analysis");
        store.set_value("name", &json!("scoped")).unwrap();
        assert_eq!(store.get_value("name").unwrap(), json!("scoped"));
        assert_eq!(store.namespace_size(), 1);
        store.end_namespace().unwrap();

        assert_eq!(store.get_value("name").unwrap(), json!("root"));
        assert_eq!(store.get_value("analysis/name").unwrap(), json!("scoped"));
    }

    #[test]
    fn test_nested_namespaces_compose() {
        let mut store = KeyValueStore::new();
        store.begin_namespace("a");
        store.begin_namespace("b");
        store.set_value("k", &json!(true)).unwrap();
        store.end_namespace().unwrap();
        store.end_namespace().unwrap();

        assert!(store.has_value("a/b/k"));
    }

    #[test]
    fn test_unbalanced_end_namespace() {
        let mut store = KeyValueStore::new();
        assert!(matches!(
            store.end_namespace(),
            Err(DatabaseError::UnbalancedNamespace)
        ));
    }

    #[test]
    fn test_namespace_guard_pops_on_drop() {
        let mut store = KeyValueStore::new();
        {
            let mut scoped = store.namespace("scoped");
            scoped.set_value("k", &json!(1)).unwrap();
            assert_eq!(scoped.namespace_size(), 1);
        }
        assert_eq!(store.namespace_size(), 0);
        assert!(store.has_value("scoped/k"));
    }

    #[test]
    fn test_keys_scoped_listing() {
        let mut store = KeyValueStore::new();
        store.set_value("top", &json!(1)).unwrap();
        store.set_value("ns/a", &json!(2)).unwrap();
        store.set_value("ns/b", &json!(3)).unwrap();

        assert_eq!(store.keys(), vec!["ns/a", "ns/b", "top"]);

        store.begin_namespace("ns");
        assert_eq!(store.keys(), vec!["ns/a", "ns/b"]);
        store.end_namespace().unwrap();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut store = KeyValueStore::new();
        store.set_value("json", &json!({"a": [1, 2, 3]})).unwrap();
        store.set_buffer("raw", vec![1, 2, 3]).unwrap();

        let data = store.serialize();
        let restored = KeyValueStore::deserialize(&data).unwrap();
        assert_eq!(store, restored);
    }

    #[test]
    fn test_serialize_deterministic() {
        let mut a = KeyValueStore::new();
        a.set_value("x", &json!(1)).unwrap();
        a.set_value("y", &json!(2)).unwrap();

        // Same mapping built in the opposite order.
        let mut b = KeyValueStore::new();
        b.set_value("y", &json!(2)).unwrap();
        b.set_value("x", &json!(1)).unwrap();

        assert_eq!(a.serialize(), b.serialize());
    }

    #[test]
    fn test_deserialize_rejects_corruption() {
        let mut store = KeyValueStore::new();
        store.set_value("k", &json!("value")).unwrap();

        let mut data = store.serialize();
        let mid = data.len() / 2;
        data[mid] ^= 0xff;

        assert!(matches!(
            KeyValueStore::deserialize(&data),
            Err(DatabaseError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_deserialize_rejects_bad_magic() {
        let result = KeyValueStore::deserialize(b"BAD\0rest of the data here");
        assert!(matches!(result, Err(DatabaseError::InvalidFormat(_))));
    }

    #[test]
    fn test_deserialize_progress() {
        let mut store = KeyValueStore::new();
        for i in 0..5 {
            store.set_value(&format!("k{}", i), &json!(i)).unwrap();
        }

        let data = store.serialize();
        let mut calls = Vec::new();
        KeyValueStore::deserialize_with_progress(&data, |current, total| {
            calls.push((current, total));
        })
        .unwrap();

        assert_eq!(calls, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
    }

    #[test]
    fn test_oversized_key_rejected() {
        let mut store = KeyValueStore::new();
        let long_key = "k".repeat(70_000);

        assert!(matches!(
            store.set_value(&long_key, &json!(1)),
            Err(DatabaseError::Write(_))
        ));
        assert!(matches!(
            store.set_buffer(&long_key, vec![1]),
            Err(DatabaseError::Write(_))
        ));
        assert!(store.is_empty());

        // The longest accepted key still round-trips.
        let max_key = "k".repeat(u16::MAX as usize);
        store.set_value(&max_key, &json!(1)).unwrap();
        let restored = KeyValueStore::deserialize(&store.serialize()).unwrap();
        assert_eq!(store, restored);
        assert_eq!(restored.get_value(&max_key).unwrap(), json!(1));
    }

    #[test]
    fn test_namespace_prefix_counts_against_key_limit() {
        let mut store = KeyValueStore::new();
        store.begin_namespace(&"n".repeat(u16::MAX as usize));

        // The key alone fits; the fully-qualified key does not.
        assert!(matches!(
            store.set_value("k", &json!(1)),
            Err(DatabaseError::Write(_))
        ));
        store.end_namespace().unwrap();
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut store = KeyValueStore::new();
        store.set_value("k", &json!(1)).unwrap();
        store.make_read_only();

        assert!(matches!(
            store.set_value("k", &json!(2)),
            Err(DatabaseError::ReadOnly)
        ));
        assert!(matches!(
            store.set_buffer("b", vec![1]),
            Err(DatabaseError::ReadOnly)
        ));
        assert_eq!(store.get_value("k").unwrap(), json!(1));
    }

    #[test]
    fn test_size_accounting() {
        let mut store = KeyValueStore::new();
        assert!(store.is_empty());
        assert_eq!(store.data_size(), 0);

        store.set_buffer("k", vec![0u8; 10]).unwrap();
        assert_eq!(store.data_size(), 10);

        // Overwrite replaces, not accumulates.
        store.set_buffer("k", vec![0u8; 4]).unwrap();
        assert_eq!(store.data_size(), 4);
        assert_eq!(store.value_size(), 1);

        // Storage estimate matches the real serialized size.
        assert_eq!(store.value_storage_size(), store.serialize().len());
    }
}
