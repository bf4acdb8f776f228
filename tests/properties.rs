//! Property tests for the key/value payload codec.

use proptest::prelude::*;
use serde_json::json;
use snapdb::KeyValueStore;

fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_/]{0,20}"
}

fn value_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        any::<bool>().prop_map(|b| json!(b)),
        any::<i64>().prop_map(|n| json!(n)),
        "[ -~]{0,32}".prop_map(|s| json!(s)),
        proptest::collection::vec(any::<i32>(), 0..8).prop_map(|v| json!(v)),
    ]
}

proptest! {
    #[test]
    fn roundtrip_preserves_mapping(
        entries in proptest::collection::btree_map(key_strategy(), value_strategy(), 0..32)
    ) {
        let mut store = KeyValueStore::new();
        for (key, value) in &entries {
            store.set_value(key, value).unwrap();
        }

        let restored = KeyValueStore::deserialize(&store.serialize()).unwrap();
        prop_assert_eq!(&store, &restored);
        for (key, value) in &entries {
            prop_assert_eq!(&restored.get_value(key).unwrap(), value);
        }
    }

    #[test]
    fn serialization_ignores_insertion_order(
        entries in proptest::collection::btree_map(key_strategy(), value_strategy(), 1..16)
    ) {
        let mut forward = KeyValueStore::new();
        for (key, value) in &entries {
            forward.set_value(key, value).unwrap();
        }

        let mut backward = KeyValueStore::new();
        for (key, value) in entries.iter().rev() {
            backward.set_value(key, value).unwrap();
        }

        prop_assert_eq!(forward.serialize(), backward.serialize());
    }

    #[test]
    fn buffers_roundtrip_byte_exact(
        entries in proptest::collection::btree_map(
            key_strategy(),
            proptest::collection::vec(any::<u8>(), 0..64),
            0..16,
        )
    ) {
        let mut store = KeyValueStore::new();
        for (key, bytes) in &entries {
            store.set_buffer(key, bytes.clone()).unwrap();
        }

        let restored = KeyValueStore::deserialize(&store.serialize()).unwrap();
        for (key, bytes) in &entries {
            prop_assert_eq!(&restored.get_buffer(key).unwrap(), bytes);
        }
    }

    #[test]
    fn storage_size_matches_serialized_length(
        entries in proptest::collection::btree_map(key_strategy(), value_strategy(), 0..16)
    ) {
        let mut store = KeyValueStore::new();
        for (key, value) in &entries {
            store.set_value(key, value).unwrap();
        }

        prop_assert_eq!(store.value_storage_size(), store.serialize().len());
    }
}
