//! The base write-back overlay cache.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Mutex;

use strata_store::{BackingStore, StoreError};

use crate::bucket::{Bucket, Pending};

/// Buckets and store, guarded together by the cache mutex.
///
/// Keeping both behind one lock is what makes each public call atomic:
/// classification consults the store, so the store must not move under a
/// half-done transition.
#[derive(Debug)]
pub(crate) struct Inner<K, V, S> {
    pub(crate) store: S,
    pub(crate) pending: Pending<K, V>,
}

/// A write-back overlay over a [`BackingStore`].
///
/// Owns the store for its lifetime and buffers every mutation in memory,
/// classified into added, modified, and removed buckets. Reads see the
/// buffered state layered over the store. Nothing reaches the store until
/// [`apply_changes`](Self::apply_changes) or [`close`](Self::close);
/// [`clear_changes`](Self::clear_changes) discards the batch instead.
/// Buffering is unbounded: there is no eviction, only flush or rollback.
///
/// Every public operation takes the instance lock for its whole duration,
/// which makes single calls atomic across threads but provides no
/// multi-call transactions; backing-store I/O during a flush also runs
/// under the lock, an explicit simplicity-over-throughput trade-off.
///
/// The cache implements [`BackingStore`] itself, so overlays stack: a
/// scratch overlay can sit on another overlay the same way it sits on a
/// durable store.
#[derive(Debug)]
pub struct WriteBackCache<K, V, S> {
    inner: Mutex<Inner<K, V, S>>,
}

impl<K, V, S> WriteBackCache<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BackingStore<K, V>,
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

    /// Returns the visible key set: backing keys, plus buffered adds,
    /// minus buffered removes. Recomputed per call.
    pub fn keys(&self) -> Result<HashSet<K>, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner.pending.keys(&inner.store)
    }

    /// Returns `true` if `key` is visible through the overlay.
    pub fn contains(&self, key: &K) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner.pending.contains(&inner.store, key)
    }

    /// Returns the visible value for `key`: the buffered value if one is
    /// pending, `None` if a remove is pending, otherwise the stored value.
    pub fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner.pending.get(&inner.store, key)
    }

    /// Buffers a full overwrite of `key`.
    pub fn set(&self, key: K, value: V) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.pending.set(&inner.store, key, value)
    }

    /// Buffers a delete of `key`. Removing an invisible key is a no-op.
    pub fn remove(&self, key: &K) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.pending.remove(&inner.store, key)
    }

    /// Which bucket currently holds `key`.
    ///
    /// After a flush that failed partway, the buckets hold exactly the
    /// uncommitted remainder, so this doubles as the diagnostic for "what
    /// is still unflushed".
    pub fn bucket_of(&self, key: &K) -> Bucket {
        self.inner.lock().unwrap().pending.bucket_of(key)
    }

    /// Commits every buffered mutation to the backing store, then empties
    /// the buckets.
    ///
    /// Adds and overwrites are forwarded before removes. On failure the
    /// error propagates unmodified; entries forwarded before the failure
    /// are durably committed and no longer buffered, the rest stay
    /// buffered for a retry. Callers must not assume all-or-nothing
    /// atomicity across a flush.
    pub fn apply_changes(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        let Inner { store, pending } = &mut *guard;
        pending.apply(store)
    }

    /// Rolls back: discards every buffered mutation, store untouched.
    pub fn clear_changes(&self) {
        self.inner.lock().unwrap().pending.clear();
    }

    /// Commits buffered mutations, then closes the backing store.
    ///
    /// Consuming `self` means an orderly shutdown can never silently drop
    /// a buffered mutation, and the store is closed exactly once.
    pub fn close(self) -> Result<(), StoreError> {
        let mut inner = self.inner.into_inner().unwrap();
        inner.pending.apply(&mut inner.store)?;
        inner.store.close()
    }

    /// Asserts the bucket invariants; test support.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let inner = self.inner.lock().unwrap();
        inner.pending.check_invariants(&inner.store);
    }
}

impl<K, V, S> BackingStore<K, V> for WriteBackCache<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BackingStore<K, V>,
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
