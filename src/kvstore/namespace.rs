//! RAII namespace scoping.

use crate::kvstore::KeyValueStore;
use std::ops::{Deref, DerefMut};

/// Guard that holds a namespace scope open.
///
/// Pushes the scope on construction and pops it on drop, so callers
/// cannot leave the store with an unbalanced scope stack.
pub struct NamespaceGuard<'a> {
    store: &'a mut KeyValueStore,
}

impl<'a> NamespaceGuard<'a> {
    pub(crate) fn enter(store: &'a mut KeyValueStore, name: &str) -> Self {
        store.begin_namespace(name);
        Self { store }
    }
}

impl Deref for NamespaceGuard<'_> {
    type Target = KeyValueStore;

    fn deref(&self) -> &KeyValueStore {
        self.store
    }
}

impl DerefMut for NamespaceGuard<'_> {
    fn deref_mut(&mut self) -> &mut KeyValueStore {
        self.store
    }
}

impl Drop for NamespaceGuard<'_> {
    fn drop(&mut self) {
        // The guard pushed exactly one scope, so the pop cannot fail.
        let _ = self.store.end_namespace();
    }
}
