//! Namespaced key/value store with whole-store serialization.
//!
//! Keys map to either canonical JSON values or raw byte buffers. A stack
//! of namespace scopes prefixes keys, and the full mapping serializes to
//! a single deterministic byte sequence.

mod namespace;
mod store;

pub use namespace::NamespaceGuard;
pub use store::{KeyValueStore, KvValue};
