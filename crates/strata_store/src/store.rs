//! The storage contracts spoken by every durable layer.
//!
//! A [`BackingStore`] is a durable key-value map. An
//! [`AppendableBackingStore`] is a backing store whose values are
//! collections and which can merge new elements into a stored collection
//! without the caller supplying (or the store rereading) the full value.
//!
//! Write-back overlays implement these same contracts over another store,
//! so overlays can be stacked and consumers stay agnostic about how many
//! buffering layers sit between them and the disk.

use std::collections::HashSet;

use crate::error::StoreError;

/// A durable key-value store.
///
/// Keys are opaque apart from equality and hashing; values are opaque
/// entirely. Absence is reported through `Ok(None)` / `Ok(false)`, never
/// as an error. Any persistence failure surfaces as [`StoreError`].
pub trait BackingStore<K, V> {
    /// Returns `true` if the store holds an entry for `key`.
    fn contains(&self, key: &K) -> Result<bool, StoreError>;

    /// Returns the value stored for `key`, or `None` if absent.
    fn get(&self, key: &K) -> Result<Option<V>, StoreError>;

    /// Stores `value` under `key`, replacing any previous entry.
    fn set(&mut self, key: K, value: V) -> Result<(), StoreError>;

    /// Removes the entry for `key`. Removing an absent key is a no-op.
    fn remove(&mut self, key: &K) -> Result<(), StoreError>;

    /// Returns the set of all keys currently stored.
    fn keys(&self) -> Result<HashSet<K>, StoreError>;

    /// Closes the store, persisting anything it still holds in memory.
    ///
    /// Consuming `self` guarantees a store is closed at most once and never
    /// used afterwards.
    fn close(self) -> Result<(), StoreError>
    where
        Self: Sized;
}

/// A [`BackingStore`] whose values are collections of elements.
///
/// The extra [`append`](Self::append) operation is the contract's reason to
/// exist: it merges elements into the stored collection durably without the
/// caller reading the current value first, which is what makes deferred
/// append buffering in an overlay worthwhile.
pub trait AppendableBackingStore<K, V>: BackingStore<K, V> {
    /// Merges `elements` into the collection stored under `key`.
    ///
    /// If `key` is absent this behaves exactly like
    /// [`set(key, elements)`](BackingStore::set).
    fn append(&mut self, key: K, elements: V) -> Result<(), StoreError>;
}
