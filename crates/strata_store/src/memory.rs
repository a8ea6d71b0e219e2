//! A purely in-memory backing store.

use std::collections::{hash_map::Entry, HashMap, HashSet};
use std::hash::Hash;

use crate::error::StoreError;
use crate::store::{AppendableBackingStore, BackingStore};

/// A [`BackingStore`] held entirely in memory.
///
/// Nothing is persisted; `close` is a no-op. Useful as the bottom layer in
/// tests and for scratch builds where durability is not wanted. Operations
/// never fail, but they return the contract `Result`s so the store is a
/// drop-in collaborator for code written against [`BackingStore`].
#[derive(Debug, Default)]
pub struct MemoryStore<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> MemoryStore<K, V> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Returns the number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for MemoryStore<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<K, V> BackingStore<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn contains(&self, key: &K) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(key))
    }

    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: K, value: V) -> Result<(), StoreError> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &K) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<HashSet<K>, StoreError> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn close(self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl<K, E, V> AppendableBackingStore<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Extend<E> + IntoIterator<Item = E>,
{
    fn append(&mut self, key: K, elements: V) -> Result<(), StoreError> {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => occupied.get_mut().extend(elements),
            Entry::Vacant(vacant) => {
                vacant.insert(elements);
            }
        }
        Ok(())
    }
}
