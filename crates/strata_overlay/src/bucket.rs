//! Pending-mutation bookkeeping shared by both overlay caches.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use strata_store::{BackingStore, StoreError};

/// Classification of a key's pending mutation.
///
/// A key occupies exactly one bucket at any time. `Unbuffered` means no
/// mutation is pending; the key may or may not exist in the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// No pending mutation.
    Unbuffered,
    /// Buffered insert of a key the backing store has never held.
    Added,
    /// Buffered overwrite of a key the backing store holds.
    Modified,
    /// Buffered elements to merge into a stored collection at flush time.
    Appended,
    /// Buffered delete of a key the backing store holds.
    Removed,
}

/// The four mutation buckets plus their transition logic.
///
/// Invariants, maintained by every method here:
///   - the buckets are pairwise disjoint;
///   - `added` keys are absent from the backing store;
///   - `modified`, `appended`, and `removed` keys are present in it.
///
/// The `appended` bucket is populated only by the appendable cache, but it
/// lives here so the transition logic exists once: `set` and `remove` must
/// reclassify appended keys no matter which cache they run under.
#[derive(Debug)]
pub(crate) struct Pending<K, V> {
    pub(crate) added: HashMap<K, V>,
    pub(crate) modified: HashMap<K, V>,
    pub(crate) appended: HashMap<K, V>,
    pub(crate) removed: HashSet<K>,
}

impl<K, V> Pending<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            added: HashMap::new(),
            modified: HashMap::new(),
            appended: HashMap::new(),
            removed: HashSet::new(),
        }
    }

    /// Which bucket currently holds `key`.
    pub(crate) fn bucket_of(&self, key: &K) -> Bucket {
        if self.added.contains_key(key) {
            Bucket::Added
        } else if self.modified.contains_key(key) {
            Bucket::Modified
        } else if self.appended.contains_key(key) {
            Bucket::Appended
        } else if self.removed.contains(key) {
            Bucket::Removed
        } else {
            Bucket::Unbuffered
        }
    }

    /// `true` if `key` is visible through the overlay.
    pub(crate) fn contains<S>(&self, store: &S, key: &K) -> Result<bool, StoreError>
    where
        S: BackingStore<K, V>,
    {
        match self.bucket_of(key) {
            Bucket::Added | Bucket::Modified | Bucket::Appended => Ok(true),
            Bucket::Removed => Ok(false),
            Bucket::Unbuffered => store.contains(key),
        }
    }

    /// The visible value for `key`.
    ///
    /// Appended keys are materialized by the appendable cache before it
    /// delegates here; this method never merges.
    pub(crate) fn get<S>(&self, store: &S, key: &K) -> Result<Option<V>, StoreError>
    where
        S: BackingStore<K, V>,
    {
        debug_assert!(
            !self.appended.contains_key(key),
            "appended keys are resolved by the caller"
        );
        if let Some(value) = self.added.get(key) {
            return Ok(Some(value.clone()));
        }
        if let Some(value) = self.modified.get(key) {
            return Ok(Some(value.clone()));
        }
        if self.removed.contains(key) {
            return Ok(None);
        }
        store.get(key)
    }

    /// The visible key set: backing keys, plus added, minus removed.
    ///
    /// Recomputed per call rather than maintained incrementally.
    pub(crate) fn keys<S>(&self, store: &S) -> Result<HashSet<K>, StoreError>
    where
        S: BackingStore<K, V>,
    {
        let mut keys = store.keys()?;
        keys.extend(self.added.keys().cloned());
        for key in &self.removed {
            keys.remove(key);
        }
        Ok(keys)
    }

    /// Buffers a full overwrite of `key`, reclassifying it by current state.
    ///
    /// An appended key loses its buffered elements (the overwrite supersedes
    /// the partial append); a removed key is un-deleted into `modified`.
    pub(crate) fn set<S>(&mut self, store: &S, key: K, value: V) -> Result<(), StoreError>
    where
        S: BackingStore<K, V>,
    {
        if self.added.contains_key(&key) {
            self.added.insert(key, value);
        } else if self.modified.contains_key(&key) {
            self.modified.insert(key, value);
        } else if self.appended.remove(&key).is_some() {
            self.modified.insert(key, value);
        } else if self.removed.remove(&key) {
            self.modified.insert(key, value);
        } else if store.contains(&key)? {
            self.modified.insert(key, value);
        } else {
            self.added.insert(key, value);
        }
        Ok(())
    }

    /// Buffers a delete of `key`.
    ///
    /// An added key is dropped outright (it was never persisted); removing
    /// an already-removed or absent key is a no-op.
    pub(crate) fn remove<S>(&mut self, store: &S, key: &K) -> Result<(), StoreError>
    where
        S: BackingStore<K, V>,
    {
        if self.added.remove(key).is_some() {
            // Never persisted, nothing to delete downstream.
        } else if self.modified.remove(key).is_some() {
            self.removed.insert(key.clone());
        } else if self.appended.remove(key).is_some() {
            self.removed.insert(key.clone());
        } else if self.removed.contains(key) {
            // Already buffered.
        } else if store.contains(key)? {
            self.removed.insert(key.clone());
        }
        Ok(())
    }

    /// Forwards the buffered mutations to the store and clears the buckets.
    ///
    /// Order matters: adds and overwrites go before removals, because a key
    /// removed and then set again mid-session sits in `modified` and must
    /// end up set. Each entry leaves its bucket as soon as its own forward
    /// succeeds, so after a mid-batch failure the buckets hold exactly the
    /// uncommitted remainder and a retry forwards only that.
    ///
    /// # Panics
    ///
    /// Panics if the `appended` bucket is non-empty. The appendable cache
    /// drains it before delegating here; anything else is a logic defect,
    /// not an I/O failure.
    pub(crate) fn apply<S>(&mut self, store: &mut S) -> Result<(), StoreError>
    where
        S: BackingStore<K, V>,
    {
        while let Some((key, value)) = first_entry(&self.added) {
            store.set(key.clone(), value)?;
            self.added.remove(&key);
        }
        while let Some((key, value)) = first_entry(&self.modified) {
            store.set(key.clone(), value)?;
            self.modified.remove(&key);
        }
        assert!(
            self.appended.is_empty(),
            "appended entries must be drained before the base flush"
        );
        while let Some(key) = self.removed.iter().next().cloned() {
            store.remove(&key)?;
            self.removed.remove(&key);
        }
        Ok(())
    }

    /// Discards every buffered mutation; the store is untouched.
    pub(crate) fn clear(&mut self) {
        self.added.clear();
        self.modified.clear();
        self.appended.clear();
        self.removed.clear();
    }

    /// Asserts the bucket invariants against the given store.
    #[cfg(test)]
    pub(crate) fn check_invariants<S>(&self, store: &S)
    where
        S: BackingStore<K, V>,
    {
        let backing = store.keys().unwrap();
        for key in self.added.keys() {
            assert!(!backing.contains(key), "added key exists in backing store");
            assert!(!self.modified.contains_key(key));
            assert!(!self.appended.contains_key(key));
            assert!(!self.removed.contains(key));
        }
        for key in self.modified.keys() {
            assert!(backing.contains(key), "modified key missing from backing store");
            assert!(!self.appended.contains_key(key));
            assert!(!self.removed.contains(key));
        }
        for key in self.appended.keys() {
            assert!(backing.contains(key), "appended key missing from backing store");
            assert!(!self.removed.contains(key));
        }
        for key in &self.removed {
            assert!(backing.contains(key), "removed key missing from backing store");
        }
    }
}

/// Clones out an arbitrary entry, or `None` if the map is empty.
pub(crate) fn first_entry<K: Clone, V: Clone>(map: &HashMap<K, V>) -> Option<(K, V)> {
    map.iter().next().map(|(k, v)| (k.clone(), v.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::MemoryStore;

    fn backing() -> MemoryStore<&'static str, u32> {
        [("x", 1), ("y", 2)].into_iter().collect()
    }

    #[test]
    fn set_classifies_by_backing_membership() {
        let store = backing();
        let mut pending = Pending::new();

        pending.set(&store, "x", 9).unwrap();
        assert_eq!(pending.bucket_of(&"x"), Bucket::Modified);

        pending.set(&store, "new", 5).unwrap();
        assert_eq!(pending.bucket_of(&"new"), Bucket::Added);

        pending.check_invariants(&store);
    }

    #[test]
    fn set_undeletes_removed_key() {
        let store = backing();
        let mut pending = Pending::new();

        pending.remove(&store, &"x").unwrap();
        assert_eq!(pending.bucket_of(&"x"), Bucket::Removed);

        pending.set(&store, "x", 9).unwrap();
        assert_eq!(pending.bucket_of(&"x"), Bucket::Modified);
        pending.check_invariants(&store);
    }

    #[test]
    fn remove_drops_added_key_entirely() {
        let store = backing();
        let mut pending = Pending::new();

        pending.set(&store, "new", 5).unwrap();
        pending.remove(&store, &"new").unwrap();
        assert_eq!(pending.bucket_of(&"new"), Bucket::Unbuffered);
        assert!(!pending.contains(&store, &"new").unwrap());
        pending.check_invariants(&store);
    }

    #[test]
    fn remove_is_idempotent() {
        let store = backing();
        let mut pending = Pending::new();

        pending.remove(&store, &"x").unwrap();
        pending.remove(&store, &"x").unwrap();
        assert_eq!(pending.bucket_of(&"x"), Bucket::Removed);

        pending.remove(&store, &"absent").unwrap();
        assert_eq!(pending.bucket_of(&"absent"), Bucket::Unbuffered);
        pending.check_invariants(&store);
    }

    #[test]
    fn keys_is_backing_plus_added_minus_removed() {
        let store = backing();
        let mut pending = Pending::new();

        pending.set(&store, "new", 5).unwrap();
        pending.remove(&store, &"y").unwrap();

        let keys = pending.keys(&store).unwrap();
        assert_eq!(keys, HashSet::from(["x", "new"]));
    }

    #[test]
    fn apply_forwards_and_empties() {
        let mut store = backing();
        let mut pending = Pending::new();

        pending.set(&store, "new", 5).unwrap();
        pending.set(&store, "x", 9).unwrap();
        pending.remove(&store, &"y").unwrap();

        pending.apply(&mut store).unwrap();

        assert_eq!(store.get(&"new").unwrap(), Some(5));
        assert_eq!(store.get(&"x").unwrap(), Some(9));
        assert_eq!(store.get(&"y").unwrap(), None);
        assert!(pending.added.is_empty());
        assert!(pending.modified.is_empty());
        assert!(pending.removed.is_empty());
    }

    #[test]
    #[should_panic(expected = "appended entries must be drained")]
    fn apply_with_appended_entries_is_a_defect() {
        let mut store = backing();
        let mut pending = Pending::new();

        pending.appended.insert("x", 9);
        let _ = pending.apply(&mut store);
    }

    #[test]
    fn clear_discards_everything() {
        let store = backing();
        let mut pending = Pending::new();

        pending.set(&store, "new", 5).unwrap();
        pending.remove(&store, &"x").unwrap();
        pending.clear();

        assert_eq!(pending.bucket_of(&"new"), Bucket::Unbuffered);
        assert_eq!(pending.bucket_of(&"x"), Bucket::Unbuffered);
        assert!(pending.contains(&store, &"x").unwrap());
    }
}
