//! The append-aware write-back overlay for collection values.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Mutex;

use strata_store::{AppendableBackingStore, BackingStore, StoreError};

use crate::bucket::{first_entry, Bucket, Pending};
use crate::cache::Inner;

/// A write-back overlay over an [`AppendableBackingStore`].
///
/// Behaves like [`WriteBackCache`](crate::WriteBackCache) and adds
/// [`append`](Self::append): new elements for a key the backing store
/// already holds go into a dedicated appended bucket, deferring the
/// expensive read-plus-concatenate until flush time, when they are
/// forwarded through the store's own cheap
/// [`append`](AppendableBackingStore::append). The full stored collection
/// is never pulled into memory on the append path; only
/// [`get`](Self::get) materializes it.
///
/// A full overwrite of an appended key supersedes the pending partial
/// append, and a remove discards it; both reclassifications live in the
/// shared bucket logic so the two caches cannot drift apart.
#[derive(Debug)]
pub struct AppendableWriteBackCache<K, V, S> {
    inner: Mutex<Inner<K, V, S>>,
}

impl<K, E, V, S> AppendableWriteBackCache<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone + Extend<E> + IntoIterator<Item = E>,
    S: AppendableBackingStore<K, V>,
{
    /// Creates an overlay owning `store`, with all buckets empty.
    pub fn new(store: S) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store,
                pending: Pending::new(),
            }),
        }
    }

    /// Returns the visible key set. Appended keys are already backing keys,
    /// so they need no adjustment here.
    pub fn keys(&self) -> Result<HashSet<K>, StoreError> {
        let guard = self.inner.lock().unwrap();
        guard.pending.keys(&guard.store)
    }

    /// Returns `true` if `key` is visible through the overlay.
    pub fn contains(&self, key: &K) -> Result<bool, StoreError> {
        let guard = self.inner.lock().unwrap();
        guard.pending.contains(&guard.store, key)
    }

    /// Returns the visible value for `key`.
    ///
    /// For an appended key this materializes the stored collection plus the
    /// buffered elements, without mutating either.
    pub fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        let guard = self.inner.lock().unwrap();
        if let Some(elements) = guard.pending.appended.get(key) {
            let mut value = guard
                .store
                .get(key)?
                .expect("appended key is missing from the backing store");
            value.extend(elements.clone());
            return Ok(Some(value));
        }
        guard.pending.get(&guard.store, key)
    }

    /// Buffers a full overwrite of `key`.
    ///
    /// If a partial append is pending for `key`, its buffered elements are
    /// dropped: the overwrite defines the whole new value.
    pub fn set(&self, key: K, value: V) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.pending.set(&inner.store, key, value)
    }

    /// Buffers a delete of `key`, dropping any pending appended elements.
    pub fn remove(&self, key: &K) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.pending.remove(&inner.store, key)
    }

    /// Buffers `elements` to be merged into the collection under `key`.
    ///
    /// If a value is already buffered for the key the elements concatenate
    /// onto it in memory. A removed key becomes `Modified` holding exactly
    /// `elements`, since the removal already discarded the old contents.
    /// Only an unbuffered key that exists in the backing store lands in the
    /// appended bucket; the check is a key lookup, never a value read.
    pub fn append(&self, key: K, elements: V) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if let Some(value) = inner.pending.added.get_mut(&key) {
            value.extend(elements);
            return Ok(());
        }
        if let Some(value) = inner.pending.modified.get_mut(&key) {
            value.extend(elements);
            return Ok(());
        }
        if let Some(buffered) = inner.pending.appended.get_mut(&key) {
            buffered.extend(elements);
            return Ok(());
        }
        if inner.pending.removed.remove(&key) {
            inner.pending.modified.insert(key, elements);
            return Ok(());
        }
        if inner.store.contains(&key)? {
            inner.pending.appended.insert(key, elements);
        } else {
            inner.pending.added.insert(key, elements);
        }
        Ok(())
    }

    /// Which bucket currently holds `key`.
    pub fn bucket_of(&self, key: &K) -> Bucket {
        self.inner.lock().unwrap().pending.bucket_of(key)
    }

    /// Commits every buffered mutation, then empties the buckets.
    ///
    /// Appended entries are forwarded first, each through the store's cheap
    /// `append`, then the base flush runs (adds, overwrites, removes).
    /// Partial-failure behavior matches the base cache: every entry leaves
    /// its bucket as soon as its own forward succeeds.
    pub fn apply_changes(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        flush(&mut *guard)
    }

    /// Rolls back: discards every buffered mutation, store untouched.
    pub fn clear_changes(&self) {
        self.inner.lock().unwrap().pending.clear();
    }

    /// Commits buffered mutations, then closes the backing store.
    pub fn close(self) -> Result<(), StoreError> {
        let mut inner = self.inner.into_inner().unwrap();
        flush(&mut inner)?;
        inner.store.close()
    }

    /// Asserts the bucket invariants; test support.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let guard = self.inner.lock().unwrap();
        guard.pending.check_invariants(&guard.store);
    }
}

/// Drains the appended bucket through the store's `append`, then runs the
/// base flush, which by construction finds the bucket empty.
fn flush<K, E, V, S>(inner: &mut Inner<K, V, S>) -> Result<(), StoreError>
where
    K: Eq + Hash + Clone,
    V: Clone + Extend<E> + IntoIterator<Item = E>,
    S: AppendableBackingStore<K, V>,
{
    let Inner { store, pending } = inner;
    while let Some((key, elements)) = first_entry(&pending.appended) {
        store.append(key.clone(), elements)?;
        pending.appended.remove(&key);
    }
    pending.apply(store)
}

impl<K, E, V, S> BackingStore<K, V> for AppendableWriteBackCache<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone + Extend<E> + IntoIterator<Item = E>,
    S: AppendableBackingStore<K, V>,
{
    fn contains(&self, key: &K) -> Result<bool, StoreError> {
        Self::contains(self, key)
    }

    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        Self::get(self, key)
    }

    fn set(&mut self, key: K, value: V) -> Result<(), StoreError> {
        Self::set(self, key, value)
    }

    fn remove(&mut self, key: &K) -> Result<(), StoreError> {
        Self::remove(self, key)
    }

    fn keys(&self) -> Result<HashSet<K>, StoreError> {
        Self::keys(self)
    }

    fn close(self) -> Result<(), StoreError> {
        Self::close(self)
    }
}

impl<K, E, V, S> AppendableBackingStore<K, V> for AppendableWriteBackCache<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone + Extend<E> + IntoIterator<Item = E>,
    S: AppendableBackingStore<K, V>,
{
    fn append(&mut self, key: K, elements: V) -> Result<(), StoreError> {
        Self::append(self, key, elements)
    }
}
